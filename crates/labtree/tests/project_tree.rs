//! End-to-end scenarios over a project directory shared by several
//! `Project` instances, the way separate processes would use it.

use std::fs;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};

use labtree::{confirm, Error, ExpQuery, Project, RunSpec, StatusKind, TaskRegistry};

fn registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry
        .register("echo", |_checkpoints, params| Ok(params.clone()))
        .unwrap();
    registry
        .register("explode", |_checkpoints, _params| {
            Err(anyhow::anyhow!("boom"))
        })
        .unwrap();
    registry
}

fn setup() -> (tempfile::TempDir, Project) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    confirm::set_confirm_off(true);
    let dir = tempfile::tempdir().unwrap();
    let proj = Project::create(dir.path().join("proj"), "demo", "demo project").unwrap();
    (dir, proj)
}

#[test]
fn status_bubbles_from_leaf_to_project() {
    let (_guard, mut proj) = setup();
    let registry = registry();
    assert_eq!(proj.status().unwrap().kind, StatusKind::Empty);

    proj.make_group("baseline", "", None).unwrap();
    proj.make_exp(1, "run", "", None).unwrap();
    assert_eq!(proj.status().unwrap().kind, StatusKind::Empty);

    proj.exp_mut(1, 1)
        .unwrap()
        .make_pipeline(
            RunSpec {
                task: "echo".into(),
                params: json!({"ok": true}),
            },
            true,
        )
        .unwrap();
    assert_eq!(
        proj.group_mut(1).unwrap().status().unwrap().kind,
        StatusKind::Todo
    );
    assert_eq!(proj.status().unwrap().kind, StatusKind::Todo);

    proj.start(&registry, "1.1").unwrap();
    assert_eq!(proj.status().unwrap().kind, StatusKind::Done);

    proj.exp_mut(1, 1).unwrap().success("metrics fine").unwrap();
    assert_eq!(proj.status().unwrap().kind, StatusKind::Success);
    assert!(!proj.status().unwrap().manual);
    assert!(proj.exp_mut(1, 1).unwrap().status().unwrap().manual);
}

#[test]
fn second_instance_sees_changes_after_update() {
    let (_guard, mut writer) = setup();
    let mut reader = Project::open(writer.location_dir()).unwrap();
    assert_eq!(reader.num_groups(), 0);

    writer.make_group("g", "", None).unwrap();
    writer.make_exp(1, "e", "", None).unwrap();
    reader.update().unwrap();
    assert_eq!(reader.num_groups(), 1);
    assert_eq!(reader.exp_mut(1, 1).unwrap().name().unwrap(), "e");

    writer.destroy_exp(1, 1, false).unwrap();
    reader.update().unwrap();
    assert!(matches!(reader.exp(1, 1).unwrap_err(), Error::NotExists(_)));
}

#[test]
fn stale_blob_ignored_until_marker_moves() {
    let (_guard, mut proj) = setup();
    proj.make_group("g", "", None).unwrap();
    proj.make_exp(1, "before", "", None).unwrap();
    let exp_dir = proj.exp(1, 1).unwrap().location_dir().to_path_buf();

    // a foreign write that skips the marker protocol stays invisible
    thread::sleep(Duration::from_millis(5));
    let data_path = exp_dir.join(".data");
    let mut blob: Value =
        serde_json::from_slice(&fs::read(&data_path).unwrap()).unwrap();
    blob["name"] = json!("after");
    fs::write(&data_path, serde_json::to_vec_pretty(&blob).unwrap()).unwrap();
    assert_eq!(proj.exp_mut(1, 1).unwrap().name().unwrap(), "before");

    // bumping the marker makes the same blob visible
    thread::sleep(Duration::from_millis(5));
    let time_path = exp_dir.join(".time");
    let marker: i64 = fs::read_to_string(&time_path)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    fs::write(&time_path, (marker + 1).to_string()).unwrap();
    assert_eq!(proj.exp_mut(1, 1).unwrap().name().unwrap(), "after");
}

#[test]
fn pipeline_error_is_visible_to_another_instance() {
    let (_guard, mut runner) = setup();
    let registry = registry();
    runner.make_group("g", "", None).unwrap();
    runner.make_exp(1, "doomed", "", None).unwrap();
    runner
        .exp_mut(1, 1)
        .unwrap()
        .make_pipeline(
            RunSpec {
                task: "explode".into(),
                params: Value::Null,
            },
            true,
        )
        .unwrap();
    let err = runner.start(&registry, "1.1").unwrap_err();
    assert!(matches!(err, Error::Pipeline(_)));

    let mut observer = Project::open(runner.location_dir()).unwrap();
    let exp = observer.exp_mut(1, 1).unwrap();
    assert_eq!(exp.status().unwrap().kind, StatusKind::Error);
    assert_eq!(exp.status().unwrap().resolution.as_deref(), Some("boom"));
    assert_eq!(exp.error(), Some("boom"));
    assert!(exp.error_stack().is_some());
    assert_eq!(observer.status().unwrap().kind, StatusKind::Error);
}

#[test]
fn checkpoints_survive_the_run() {
    let (_guard, mut proj) = setup();
    let mut registry = TaskRegistry::new();
    registry
        .register("stepwise", |checkpoints, params| {
            let steps = params["steps"].as_u64().unwrap_or(1);
            for step in 0..steps {
                let blob = format!("weights after step {step}");
                checkpoints.save_checkpoint(blob.as_bytes(), false, None)?;
            }
            Ok(json!({"steps": steps}))
        })
        .unwrap();
    proj.make_group("g", "", None).unwrap();
    proj.make_exp(1, "train", "", None).unwrap();
    proj.exp_mut(1, 1)
        .unwrap()
        .make_pipeline(
            RunSpec {
                task: "stepwise".into(),
                params: json!({"steps": 3}),
            },
            true,
        )
        .unwrap();
    proj.start(&registry, "1.1").unwrap();

    let mediator = proj.exp(1, 1).unwrap().checkpoints_mediator();
    let list = mediator.get_checkpoint_paths_list(true).unwrap();
    assert_eq!(list.len(), 3);
    assert_eq!(
        mediator.load_checkpoint(&list[2]).unwrap(),
        b"weights after step 2"
    );

    assert!(proj.exp_mut(1, 1).unwrap().delete_checkpoints(false).unwrap());
    let mediator = proj.exp(1, 1).unwrap().checkpoints_mediator();
    assert!(mediator.get_checkpoint_paths_list(true).unwrap().is_empty());
}

#[test]
fn destroying_a_group_takes_its_experiments() {
    let (_guard, mut proj) = setup();
    proj.make_group("g1", "", None).unwrap();
    proj.make_group("g2", "", None).unwrap();
    proj.make_exp(1, "e", "", None).unwrap();
    let group_dir = proj.group(1).unwrap().location_dir().to_path_buf();

    assert!(proj.destroy_group(1, false).unwrap());
    assert!(!group_dir.exists());
    assert_eq!(proj.group_nums(), vec![2]);
    assert!(matches!(proj.group("g1").unwrap_err(), Error::NotExists(_)));
}

#[test]
fn manual_override_survives_reopen_and_removal_restores_auto() {
    let (_guard, mut proj) = setup();
    proj.make_group("g", "", None).unwrap();
    proj.make_exp(1, "e", "", None).unwrap();
    proj.exp_mut(1, 1)
        .unwrap()
        .set_manual_status("IN_PROGRESS", None)
        .unwrap();
    assert_eq!(proj.status().unwrap().kind, StatusKind::InProgress);

    let mut reopened = Project::open(proj.location_dir()).unwrap();
    let exp = reopened.exp_mut(1, 1).unwrap();
    assert_eq!(exp.status().unwrap().kind, StatusKind::InProgress);
    assert!(exp.status().unwrap().manual);

    reopened.exp_mut(1, 1).unwrap().delete_manual_status().unwrap();
    assert_eq!(
        reopened.exp_mut(1, 1).unwrap().status().unwrap().kind,
        StatusKind::Empty
    );
    assert_eq!(reopened.status().unwrap().kind, StatusKind::Empty);
}

#[test]
fn filter_finds_work_left_to_do() {
    let (_guard, mut proj) = setup();
    let registry = registry();
    proj.make_group("g1", "", None).unwrap();
    proj.make_group("g2", "", None).unwrap();
    for (group, name) in [(1, "a"), (1, "b"), (2, "c")] {
        let num = proj.make_exp(group, name, "", None).unwrap();
        proj.exp_mut(group, num)
            .unwrap()
            .make_pipeline(
                RunSpec {
                    task: "echo".into(),
                    params: json!(name),
                },
                true,
            )
            .unwrap();
    }
    proj.start_next(&registry, false).unwrap();

    let todo = ExpQuery::new().status_in(&[StatusKind::Todo]);
    assert_eq!(proj.filter_exps(&todo).unwrap(), vec![(1, 2), (2, 1)]);

    proj.start_next(&registry, true).unwrap();
    assert!(proj.filter_exps(&todo).unwrap().is_empty());
    assert_eq!(proj.status().unwrap().kind, StatusKind::Done);
}

#[test]
fn accessors_resync_across_instances_without_update() {
    let (_guard, mut writer) = setup();
    writer.make_group("g", "", None).unwrap();
    writer.make_exp(1, "e1", "", None).unwrap();
    writer.make_exp(1, "e2", "", None).unwrap();

    let mut reader = Project::open(writer.location_dir()).unwrap();
    assert_eq!(reader.status().unwrap().kind, StatusKind::Empty);

    writer.exp_mut(1, 1).unwrap().fail("bad seed").unwrap();

    // no explicit update(): reading a status resynchronizes by itself
    assert_eq!(
        reader.group_mut(1).unwrap().status().unwrap().kind,
        StatusKind::InProgress
    );
    assert_eq!(reader.status().unwrap().kind, StatusKind::InProgress);
    let exp = reader.exp_mut(1, 1).unwrap();
    assert_eq!(exp.status().unwrap().kind, StatusKind::Fail);
    assert!(exp.status().unwrap().manual);
}
