//! End-to-end tests for the `entwine` binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

struct Env {
    dir: TempDir,
}

impl Env {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("entwine").unwrap();
        cmd.env_remove("RUST_LOG")
            .env_remove("ENTWINE_DATA_DIR")
            .env("ENTWINE_CONFIG", self.dir.path().join("config.toml"))
            .arg("--data-dir")
            .arg(self.dir.path().join("data"));
        cmd
    }

    fn run(&self, args: &[&str]) -> assert_cmd::assert::Assert {
        self.cmd().args(args).assert()
    }
}

fn seed_student(env: &Env) {
    env.run(&["entity", "add", "Guardian", "--set", "name=Ravi"])
        .success()
        .stdout(predicate::str::contains("Created Guardian:1"));
    env.run(&[
        "entity",
        "add",
        "Student",
        "--set",
        "email=asha@example.com",
        "--embed",
        "name.firstname=Asha",
        "--link",
        "guardian=Guardian:1",
    ])
    .success()
    .stdout(predicate::str::contains("Created Student:1"));
}

#[test]
fn test_help() {
    let env = Env::new();
    env.run(&["--help"])
        .success()
        .stdout(predicate::str::contains("entity"))
        .stdout(predicate::str::contains("relation"));
}

#[test]
fn test_add_and_get_with_link() {
    let env = Env::new();
    seed_student(&env);

    env.run(&["--format", "json", "entity", "get", "Student", "1"])
        .success()
        .stdout(predicate::str::contains("\"Guardian:1\""))
        .stdout(predicate::str::contains("asha@example.com"));

    env.run(&["entity", "get", "Guardian", "1"])
        .success()
        .stdout(predicate::str::contains("students -> Student:1"));
}

#[test]
fn test_student_requires_guardian() {
    let env = Env::new();
    env.run(&["entity", "add", "Student", "--set", "email=x@example.com"])
        .failure()
        .stderr(predicate::str::contains("guardian"));
}

#[test]
fn test_list_with_filter() {
    let env = Env::new();
    env.run(&["entity", "add", "Guardian", "--set", "name=Ravi"]).success();
    env.run(&["entity", "add", "Guardian", "--set", "name=Meera"]).success();

    env.run(&["entity", "list", "Guardian", "--where", "name=Meera"])
        .success()
        .stdout(predicate::str::contains("Guardian:2"))
        .stdout(predicate::str::contains("Guardian:1").not());
}

#[test]
fn test_page_rejects_negative_offset() {
    let env = Env::new();
    env.run(&["entity", "add", "Course", "--set", "name=DBA"]).success();

    env.run(&["entity", "page", "Course", "--offset", "-1"]).failure();
    env.run(&["entity", "page", "Course", "--limit", "1"])
        .success()
        .stdout(predicate::str::contains("Showing 1 of 1"));
    env.run(&["entity", "page", "Course", "--limit", "5000"]).failure();
}

#[test]
fn test_page_with_filter() {
    let env = Env::new();
    for name in ["DBA", "DSA", "DBA"] {
        env.run(&["entity", "add", "Course", "--set", &format!("name={}", name)])
            .success();
    }

    env.run(&["entity", "page", "Course", "--where", "name=DBA", "--limit", "1"])
        .success()
        .stdout(predicate::str::contains("Course:1"))
        .stdout(predicate::str::contains("Showing 1 of 2"));
    env.run(&["entity", "page", "Course", "--where", "name=OS"])
        .success()
        .stdout(predicate::str::contains("Showing 0 of 0"));
}

#[test]
fn test_delete_and_repair() {
    let env = Env::new();
    seed_student(&env);
    env.run(&[
        "entity",
        "add",
        "Course",
        "--set",
        "name=DSA",
        "--link",
        "students=Student:1",
    ])
    .success();

    env.run(&["entity", "delete", "Student", "1"])
        .success()
        .stdout(predicate::str::contains("Deleted Student:1"))
        .stdout(predicate::str::contains("Requires repair: Course:1"));

    env.run(&["entity", "get", "Course", "1"])
        .success()
        .stdout(predicate::str::contains("Requires repair: Student:1"));

    env.run(&["entity", "repair", "Course", "1"])
        .success()
        .stdout(predicate::str::contains("Repaired Course:1"));

    env.run(&["entity", "get", "Course", "1"])
        .success()
        .stdout(predicate::str::contains("Requires repair").not());

    env.run(&["entity", "get", "Student", "1"]).failure();
}

#[test]
fn test_relation_link_and_resolve() {
    let env = Env::new();
    seed_student(&env);
    env.run(&["entity", "add", "Course", "--set", "name=DBA"]).success();

    env.run(&["relation", "link", "Student", "1", "courses", "Course", "1"])
        .success()
        .stdout(predicate::str::contains("Linked Student:1.courses -> Course:1"));

    env.run(&["relation", "resolve", "Course", "1", "students"])
        .success()
        .stdout(predicate::str::contains("Student:1"));

    env.run(&["relation", "unlink", "Student", "1", "courses", "Course", "1"])
        .success();
    env.run(&["relation", "resolve", "Course", "1", "students"])
        .success()
        .stdout(predicate::str::contains("No entities found"));
}

#[test]
fn test_schema_show_and_check() {
    let env = Env::new();
    env.run(&["schema", "show"])
        .success()
        .stdout(predicate::str::contains("Student.guardian -> Guardian"));

    let path = env.dir.path().join("bad.toml");
    std::fs::write(
        &path,
        "[[relationships]]\nsource = \"A\"\nslot = \"b\"\ntarget = \"B\"\ncardinality = \"many_to_one\"\nowning_side = \"A\"\n",
    )
    .unwrap();
    env.run(&["schema", "check", path.to_str().unwrap()]).failure();
}

#[test]
fn test_unknown_schema_preset() {
    let env = Env::new();
    env.run(&["--schema", "bank", "entity", "list", "Student"])
        .failure()
        .stderr(predicate::str::contains("Unknown schema"));
}

#[test]
fn test_config_set_and_get() {
    let env = Env::new();
    env.run(&["config", "set", "page_size", "5"]).success();
    env.run(&["config", "get", "page_size"])
        .success()
        .stdout(predicate::str::contains("5"));
    env.run(&["config", "get", "colour"]).failure();
}

#[test]
fn test_completions() {
    let env = Env::new();
    env.run(&["completions", "bash"])
        .success()
        .stdout(predicate::str::contains("entwine"));

    let out = env.dir.path().join("entwine.fish");
    env.run(&["completions", "fish", "--out", out.to_str().unwrap()])
        .success();
    assert!(std::fs::read_to_string(&out).unwrap().contains("entwine"));
}
