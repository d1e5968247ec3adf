use std::fs;
use std::process::Command;

fn jvmflow() -> Command {
    let binary = std::env::var("CARGO_BIN_EXE_jvmflow").unwrap_or_else(|_| {
        let mut path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("target");
        path.push("debug");
        path.push("jvmflow");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path.to_string_lossy().to_string()
    });
    Command::new(binary)
}

const PROGRAM: &str = r#"{
    "classes": [
        { "name": "p/Base", "super_name": "java/lang/Object", "application": true,
          "methods": [
            { "name": "name", "descriptor": "()Ljava/lang/Object;", "access_flags": 1,
              "cfg": { "blocks": [ { "id": 0, "instructions": [
                  { "offset": 0, "opcode": 1 }, { "offset": 1, "opcode": 176 } ] } ] },
              "value_numbers": { "num_values": 2, "frames": [
                  { "block": 0, "index": 0, "before": { "locals": [0] }, "after": { "locals": [0], "stack": [1] } },
                  { "block": 0, "index": 1, "before": { "locals": [0], "stack": [1] }, "after": { "locals": [0] } } ] } } ] },
        { "name": "java/lang/Object" }
    ]
}"#;

#[test]
fn jvmflow_exits_non_zero_on_missing_input() {
    let output = jvmflow()
        .arg("analyze")
        .arg("--input")
        .arg("missing.json")
        .output()
        .expect("run jvmflow");

    assert!(!output.status.success());
}

#[test]
fn db_check_exits_non_zero_on_corrupt_database() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("returns.db");
    fs::write(&path, "p.Base,name,()Ljava/lang/Object;,1\n").expect("write db");

    let output = jvmflow()
        .arg("db")
        .arg("check")
        .arg(&path)
        .output()
        .expect("run jvmflow");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("line 1"), "stderr: {stderr}");
}

#[test]
fn analyze_writes_sorted_application_database() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = dir.path().join("program.json");
    let method_db = dir.path().join("returns.db");
    fs::write(&input, PROGRAM).expect("write program");
    fs::write(
        &method_db,
        "java.lang.Object,toString,()Ljava/lang/String;,1|nonnull\n",
    )
    .expect("seed db");

    let output = jvmflow()
        .arg("analyze")
        .arg("--input")
        .arg(&input)
        .arg("--method-db")
        .arg(&method_db)
        .arg("--quiet")
        .output()
        .expect("run jvmflow");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let written = fs::read_to_string(&method_db).expect("read db");
    assert_eq!(written, "p.Base,name,()Ljava/lang/Object;,1|null\n");

    let check = jvmflow()
        .arg("db")
        .arg("check")
        .arg(&method_db)
        .output()
        .expect("run jvmflow");
    assert!(check.status.success());
}

#[test]
fn subtype_and_join_answer_from_program() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = dir.path().join("program.json");
    fs::write(&input, PROGRAM).expect("write program");

    let subtype = jvmflow()
        .args(["subtype", "--input"])
        .arg(&input)
        .args(["p.Base", "java.lang.Object"])
        .output()
        .expect("run jvmflow");
    assert!(subtype.status.success());
    assert_eq!(String::from_utf8_lossy(&subtype.stdout).trim(), "true");

    let join = jvmflow()
        .args(["join", "--input"])
        .arg(&input)
        .args(["[Lp/Base;", "[I"])
        .output()
        .expect("run jvmflow");
    assert!(join.status.success());
    assert_eq!(String::from_utf8_lossy(&join.stdout).trim(), "java.lang.Object");
}
