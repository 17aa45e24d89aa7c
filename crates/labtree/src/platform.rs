use std::env;

/// Whether the process runs inside a hosted notebook environment (Colab).
/// Only the liveness buffer depends on this; scheduler lag there makes the
/// default buffer produce false IDLE verdicts.
pub fn is_hosted_notebook() -> bool {
    env::var_os("COLAB_RELEASE_TAG").is_some() || env::var_os("COLAB_GPU").is_some()
}
