//! Course config loading against files on disk.

use std::fs;

use tempfile::tempdir;

use cartwright::config::load_config;

#[test]
fn full_config_loads_with_every_field() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("course.yaml"),
        "course_id: 314\ncourse_name: Algorithms\ncourse_code: CS-201\ntemplate: fancy\n",
    )
    .expect("write config");

    let config = load_config(dir.path()).expect("config should load");
    assert_eq!(config.course_id, 314);
    assert_eq!(config.course_name.as_deref(), Some("Algorithms"));
    assert_eq!(config.course_code.as_deref(), Some("CS-201"));
    assert_eq!(config.template, "fancy");
    assert_eq!(config.course_root, dir.path());
}

#[test]
fn minimal_config_defaults_the_template() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("course.yaml"), "course_id: 1\n").expect("write config");

    let config = load_config(dir.path()).expect("config should load");
    assert_eq!(config.template, "default");
}

#[test]
fn missing_config_file_is_an_error() {
    let dir = tempdir().expect("tempdir");
    let err = load_config(dir.path()).expect_err("must fail without course.yaml");
    assert!(err.to_string().contains("course.yaml"), "got: {err}");
}
