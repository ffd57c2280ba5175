use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn caravan(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("caravan").unwrap();
    cmd.current_dir(dir.path()).env("CARAVAN_ROOT", dir.path());
    cmd
}

fn init_project(dir: &TempDir) {
    caravan(dir).arg("init").assert().success();
    // Point at an instance that is never contacted by the offline tests.
    std::fs::write(
        dir.path().join("caravan.yaml"),
        "version: 1\n\
         instances:\n\
         \x20 staging:\n\
         \x20   url: http://127.0.0.1:9/api\n\
         default_instance: staging\n",
    )
    .unwrap();
}

fn write_file(dir: &TempDir, rel: &str, content: &str) {
    let path = dir.path().join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

// ---------------------------------------------------------------------------
// caravan init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_project_layout() {
    let dir = TempDir::new().unwrap();
    caravan(&dir).arg("init").assert().success();

    assert!(dir.path().join("caravan.yaml").exists());
    assert!(dir.path().join("migrations").is_dir());
    assert!(dir.path().join("features").is_dir());
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    caravan(&dir).arg("init").assert().success();
    caravan(&dir).arg("init").assert().success();
}

#[test]
fn commands_fail_before_init() {
    let dir = TempDir::new().unwrap();
    caravan(&dir)
        .args(["state", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

// ---------------------------------------------------------------------------
// caravan plan (dry run, no remote calls)
// ---------------------------------------------------------------------------

#[test]
fn plan_lists_pending_units_in_order() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    write_file(&dir, "migrations/010-second.yaml", "[]");
    write_file(&dir, "migrations/001-first.yaml", "[]");

    let assert = caravan(&dir).arg("plan").assert().success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let first = output.find("001-first.yaml").expect("first unit listed");
    let second = output.find("010-second.yaml").expect("second unit listed");
    assert!(first < second, "units must be in lexicographic order");
}

#[test]
fn plan_records_nothing() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    write_file(&dir, "migrations/001.yaml", "[]");

    caravan(&dir).arg("plan").assert().success();
    caravan(&dir)
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("would apply 001.yaml"));
}

#[test]
fn plan_resolves_feature_dependencies_in_order() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    write_file(&dir, "features/base/feature.yaml", "name: base\n");
    write_file(
        &dir,
        "features/search/feature.yaml",
        "name: search\nrequires:\n  - base\n",
    );
    write_file(&dir, "features/base/migrations/001.yaml", "[]");
    write_file(&dir, "features/search/migrations/001.yaml", "[]");

    let assert = caravan(&dir)
        .args(["plan", "--feature", "search"])
        .assert()
        .success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let base = output.find("base:").expect("base feature planned");
    let search = output.find("search:").expect("search feature planned");
    assert!(base < search, "dependency must come first");
}

#[test]
fn plan_fails_on_dependency_cycle() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    write_file(
        &dir,
        "features/a/feature.yaml",
        "name: a\nrequires:\n  - b\n",
    );
    write_file(
        &dir,
        "features/b/feature.yaml",
        "name: b\nrequires:\n  - a\n",
    );

    caravan(&dir)
        .args(["plan", "--feature", "a"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("dependency cycle"));
}

#[test]
fn plan_fails_on_missing_variable_without_fallback() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    write_file(
        &dir,
        "features/search/feature.yaml",
        "name: search\nquestions:\n  - var: index_name\n    prompt: Index name\n",
    );

    caravan(&dir)
        .args(["plan", "--feature", "search"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("index_name"));
}

#[test]
fn var_flag_satisfies_a_question() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    write_file(
        &dir,
        "features/search/feature.yaml",
        "name: search\nquestions:\n  - var: index_name\n    prompt: Index name\n",
    );

    caravan(&dir)
        .args(["plan", "--feature", "search", "--var", "index_name=products"])
        .assert()
        .success();
}

#[test]
fn unknown_feature_fails() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    caravan(&dir)
        .args(["plan", "--feature", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("feature not found"));
}

// ---------------------------------------------------------------------------
// caravan apply
// ---------------------------------------------------------------------------

#[test]
fn apply_empty_migrations_dir_succeeds() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    caravan(&dir)
        .arg("apply")
        .assert()
        .success()
        .stdout(predicate::str::contains("0 applied"));
}

#[test]
fn apply_unknown_instance_fails() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    caravan(&dir)
        .args(["apply", "--instance", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("instance not found"));
}

// ---------------------------------------------------------------------------
// caravan feature
// ---------------------------------------------------------------------------

#[test]
fn feature_list_and_show() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    write_file(
        &dir,
        "features/search/feature.yaml",
        "name: search\nrequires:\n  - base\nsecret_vars:\n  - webdav_password\n\
         default_vars:\n  webdav_password: hunter2\n  site_id: main\n",
    );
    write_file(&dir, "features/base/feature.yaml", "name: base\n");

    caravan(&dir)
        .args(["feature", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("search"));

    // Secret defaults never print in the clear.
    caravan(&dir)
        .args(["feature", "show", "search"])
        .assert()
        .success()
        .stdout(predicate::str::contains("REDACTED"))
        .stdout(predicate::str::contains("hunter2").not());
}

#[test]
fn feature_show_missing_fails() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    caravan(&dir)
        .args(["feature", "show", "ghost"])
        .assert()
        .failure();
}

// ---------------------------------------------------------------------------
// caravan state
// ---------------------------------------------------------------------------

#[test]
fn state_show_empty_instance() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    caravan(&dir)
        .args(["state", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("staging"));
}

#[test]
fn state_reset_writes_empty_record() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    caravan(&dir).args(["state", "reset"]).assert().success();
    assert!(dir.path().join(".caravan/state/staging.yaml").exists());

    caravan(&dir)
        .args(["state", "show", "-j"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"migrations\": {}"));
}

#[test]
fn state_show_json_shape() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    caravan(&dir)
        .args(["state", "show", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"instance\": \"staging\""));
}
