use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

static CONFIRM_OFF: AtomicBool = AtomicBool::new(false);

/// Globally suppress interactive prompts (every `request` answers yes).
/// Tests flip this on so destructive operations run unattended.
pub fn set_confirm_off(off: bool) {
    CONFIRM_OFF.store(off, Ordering::SeqCst);
}

pub fn confirm_off() -> bool {
    CONFIRM_OFF.load(Ordering::SeqCst)
}

fn ask(message: &str) -> bool {
    print!("{message} (y/n) ");
    let _ = io::stdout().flush();
    let mut line = String::new();
    if io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    line.trim().eq_ignore_ascii_case("y")
}

/// Interactive y/n gate in front of destructive operations. Answers yes
/// without prompting when confirmations are off or the caller suppressed
/// the question.
pub fn request(need_confirm: bool, message: &str) -> bool {
    if confirm_off() || !need_confirm {
        return true;
    }
    ask(message)
}
