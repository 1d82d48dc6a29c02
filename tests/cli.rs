use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn dh_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("dh");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(files_dir.join("people.csv"), "id,name\n1,ada\n2,bob\n").unwrap();
    fs::write(files_dir.join("notes.txt"), "not a csv").unwrap();

    let config_content = format!(
        r#"[cache]
root = "{}/cache"

[schema_cache]
ttl_secs = 300

[refresh]
max_new_records = 500
page_size = 250
"#,
        root.display()
    );
    let config_path = config_dir.join("dh.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_dh(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = dh_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run dh binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// Import the fixture CSV and return the new data source id.
fn import_people(config_path: &Path, root: &Path) -> String {
    let csv = root.join("files").join("people.csv");
    let (stdout, stderr, success) = run_dh(
        config_path,
        &["import", "csv", "--name", "people", "--path", csv.to_str().unwrap()],
    );
    assert!(success, "import failed: {}", stderr);
    stdout
        .lines()
        .find_map(|l| l.strip_prefix("id: "))
        .expect("import prints the new id")
        .trim()
        .to_string()
}

/// Stdout of a JSON-printing command without the trailing `ok`.
fn json_output(stdout: &str) -> serde_json::Value {
    let body = stdout.trim_end().trim_end_matches("ok");
    serde_json::from_str(body).unwrap()
}

#[test]
fn test_init_creates_registry() {
    let (tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_dh(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.trim_end().ends_with("ok"));

    let registry = tmp.path().join("cache").join("datasources.json");
    assert_eq!(fs::read_to_string(registry).unwrap().trim(), "[]");

    let (_, _, again) = run_dh(&config_path, &["init"]);
    assert!(again, "init should be idempotent");
}

#[test]
fn test_missing_config_names_the_path() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (_, stderr, success) = run_dh(&missing, &["list"]);
    assert!(!success);
    assert!(stderr.contains("nope.toml"));
}

#[test]
fn test_csv_import_tables_rows_and_count() {
    let (tmp, config_path) = setup_test_env();
    run_dh(&config_path, &["init"]);
    let id = import_people(&config_path, tmp.path());

    let (stdout, _, success) = run_dh(&config_path, &["list"]);
    assert!(success);
    assert!(stdout.contains(&id) && stdout.contains("people"));

    let (stdout, _, _) = run_dh(&config_path, &["tables", &id]);
    assert_eq!(stdout.lines().next(), Some("people"));

    let (stdout, _, _) = run_dh(&config_path, &["columns", &id, "people", "--types"]);
    assert!(stdout.contains("id\tINTEGER"));
    assert!(stdout.contains("name\tTEXT"));

    let (stdout, _, _) = run_dh(&config_path, &["rows", &id, "people", "--limit", "5"]);
    let rows = json_output(&stdout);
    assert_eq!(rows[0]["id"], 1);
    assert_eq!(rows[1]["name"], "bob");

    let (stdout, _, _) = run_dh(&config_path, &["count", &id, "people"]);
    assert_eq!(stdout.lines().next(), Some("2"));

    let (stdout, _, success) = run_dh(
        &config_path,
        &["sql", &id, "SELECT name FROM people WHERE id = 2"],
    );
    assert!(success);
    assert_eq!(json_output(&stdout)[0]["name"], "bob");
}

#[test]
fn test_csv_export_round_trip() {
    let (tmp, config_path) = setup_test_env();
    run_dh(&config_path, &["init"]);
    let id = import_people(&config_path, tmp.path());

    let output = tmp.path().join("exports").join("out");
    let (stdout, stderr, success) = run_dh(
        &config_path,
        &[
            "export",
            "csv",
            &id,
            "--tables",
            "people",
            "--output",
            output.to_str().unwrap(),
        ],
    );
    assert!(success, "export failed: {}", stderr);
    assert!(stdout.contains("people: 2 rows"));

    let exported = tmp.path().join("exports").join("people").join("people.csv");
    assert_eq!(
        fs::read_to_string(exported).unwrap(),
        "id,name\n1,ada\n2,bob\n"
    );
}

#[test]
fn test_rename_column_then_delete() {
    let (tmp, config_path) = setup_test_env();
    run_dh(&config_path, &["init"]);
    let id = import_people(&config_path, tmp.path());

    let (_, stderr, success) = run_dh(
        &config_path,
        &["rename-column", &id, "people", "name", "full name"],
    );
    assert!(!success);
    assert!(stderr.contains("invalid characters"));

    let (_, _, success) = run_dh(
        &config_path,
        &["rename-column", &id, "people", "name", "full_name"],
    );
    assert!(success);
    let (stdout, _, _) = run_dh(&config_path, &["columns", &id, "people"]);
    assert!(stdout.contains("full_name"));

    let (_, _, success) = run_dh(&config_path, &["delete", &id]);
    assert!(success);
    assert!(!tmp.path().join("cache").join("sources").join(&id).exists());
    let (stdout, _, _) = run_dh(&config_path, &["list"]);
    assert!(!stdout.contains(&id));
}

#[test]
fn test_routing_errors_surface_stable_text() {
    let (tmp, config_path) = setup_test_env();
    run_dh(&config_path, &["init"]);

    let (_, stderr, success) = run_dh(&config_path, &["import", "oracle", "--name", "x"]);
    assert!(!success);
    assert!(stderr.contains("unsupported driver type: oracle"));

    let (_, stderr, success) = run_dh(&config_path, &["import", "PostgreSQL", "--name", "pg"]);
    assert!(!success);
    assert!(stderr.contains("postgresql driver not supported yet"));

    let id = import_people(&config_path, tmp.path());
    let (_, stderr, success) = run_dh(&config_path, &["refresh", &id]);
    assert!(!success);
    assert!(stderr.contains("does not support refresh"));
}

#[test]
fn test_required_fields_rejected_without_network() {
    let (tmp, config_path) = setup_test_env();
    run_dh(&config_path, &["init"]);

    let cases = [
        ("shopify", "access token are required"),
        ("bigcommerce", "access token are required"),
        ("ebay", "ebay access token is required"),
        ("etsy", "etsy access token is required"),
        ("jira", "Jira base URL is required"),
        ("alpha_vantage", "API key"),
        ("iex_cloud", "token"),
        ("quandl", "API key"),
        ("mysql", "host"),
        ("csv", "file path is required"),
    ];
    for (kind, expected) in cases {
        let (_, stderr, success) = run_dh(&config_path, &["import", kind, "--name", kind]);
        assert!(!success, "{} import should fail", kind);
        assert!(stderr.contains(expected), "{}: {}", kind, stderr);
    }

    let registry = tmp.path().join("cache").join("datasources.json");
    assert_eq!(fs::read_to_string(registry).unwrap().trim(), "[]");
}

#[test]
fn test_non_csv_path_is_rejected() {
    let (tmp, config_path) = setup_test_env();
    let txt = tmp.path().join("files").join("notes.txt");
    let (_, stderr, success) = run_dh(
        &config_path,
        &["import", "csv", "--name", "notes", "--path", txt.to_str().unwrap()],
    );
    assert!(!success);
    assert!(stderr.contains("not a csv file"));
}

#[test]
fn test_unknown_setting_key() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_dh(
        &config_path,
        &["import", "mysql", "--name", "db", "--set", "hostname=db.local"],
    );
    assert!(!success);
    assert!(stderr.contains("unknown config key"));
}
