use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn site_chat_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_site-chat"))
}

fn setup_test_env(index_section: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let blog_dir = root.join("blog");
    fs::create_dir_all(blog_dir.join("2024")).unwrap();
    fs::write(
        blog_dir.join("hello.md"),
        "# Hello\n\nFirst post on the new site, mostly about sourdough.",
    )
    .unwrap();
    fs::write(
        blog_dir.join("2024").join("rust.mdx"),
        "# Learning Rust\n\nNotes on ownership and borrowing.",
    )
    .unwrap();
    fs::write(blog_dir.join("draft.md"), "   \n").unwrap();
    fs::write(blog_dir.join("image.png"), [0u8, 1, 2]).unwrap();

    fs::write(
        root.join("books.json"),
        r#"[{"id":"b1","title":"Dune","author":"Frank Herbert","year_read":2021,"rating":5,"tags":["sci-fi"]},
            {"id":"b2","title":"Kindred","author":"Octavia E. Butler","year_read":2022,"rating":5}]"#,
    )
    .unwrap();

    let config_content = format!(
        r#"{index}

[content]
blog_dir = "{root}/blog"
profile_text = "I bake bread and write software."
include_catalog = true

[catalog]
path = "{root}/books.json"
"#,
        index = index_section,
        root = root.display()
    );

    let config_path = config_dir.join("site-chat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_site_chat(config_path: &Path, args: &[&str], env: &[(&str, &str)]) -> (String, String, bool) {
    let binary = site_chat_binary();
    let mut cmd = Command::new(&binary);
    cmd.arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("OPENAI_API_KEY")
        .env_remove("PINECONE_API_KEY");
    for (k, v) in env {
        cmd.env(k, v);
    }
    let output = cmd
        .output()
        .unwrap_or_else(|e| panic!("Failed to run site-chat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

const MEMORY_INDEX: &str = "[index]\nprovider = \"memory\"";
const PINECONE_INDEX: &str = "[index]\nname = \"site\"\nenvironment = \"us-east1-gcp\"";

#[test]
fn test_ingest_dry_run_counts_documents() {
    let (_tmp, config_path) = setup_test_env(MEMORY_INDEX);

    let (stdout, stderr, success) = run_site_chat(&config_path, &["ingest", "--dry-run"], &[]);
    assert!(success, "dry run failed: stdout={}, stderr={}", stdout, stderr);
    // Two posts, one profile, two catalog rows; the blank draft is skipped.
    assert!(stdout.contains("documents: 5"), "stdout={}", stdout);
    assert!(stdout.contains("blog: 2"));
    assert!(stdout.contains("profile: 1"));
    assert!(stdout.contains("catalog-item: 2"));
}

#[test]
fn test_ingest_requires_provider_key() {
    let (_tmp, config_path) = setup_test_env(MEMORY_INDEX);

    let (_, stderr, success) = run_site_chat(&config_path, &["ingest"], &[]);
    assert!(!success);
    assert!(stderr.contains("OPENAI_API_KEY"), "stderr={}", stderr);
}

#[test]
fn test_hosted_index_requires_index_key() {
    let (_tmp, config_path) = setup_test_env(PINECONE_INDEX);

    let (_, stderr, success) =
        run_site_chat(&config_path, &["stats"], &[("OPENAI_API_KEY", "sk-test")]);
    assert!(!success);
    assert!(stderr.contains("PINECONE_API_KEY"), "stderr={}", stderr);
}

#[test]
fn test_stats_on_empty_memory_index() {
    let (_tmp, config_path) = setup_test_env(MEMORY_INDEX);

    let (stdout, stderr, success) =
        run_site_chat(&config_path, &["stats"], &[("OPENAI_API_KEY", "sk-test")]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("provider: memory"));
    assert!(stdout.contains("count: 0"));
}

#[test]
fn test_missing_config_file() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_site_chat(&tmp.path().join("nope.toml"), &["stats"], &[]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "stderr={}", stderr);
}

#[test]
fn test_invalid_config_rejected_at_startup() {
    let (_tmp, config_path) = setup_test_env("[index]\nprovider = \"faiss\"");

    let (_, stderr, success) = run_site_chat(&config_path, &["ingest", "--dry-run"], &[]);
    assert!(!success);
    assert!(stderr.contains("Unknown index provider"), "stderr={}", stderr);
}

#[test]
fn test_missing_blog_dir_aborts_collection() {
    let (tmp, config_path) = setup_test_env(MEMORY_INDEX);
    fs::remove_dir_all(tmp.path().join("blog")).unwrap();

    let (_, stderr, success) = run_site_chat(&config_path, &["ingest", "--dry-run"], &[]);
    assert!(!success);
    assert!(stderr.contains("blog"), "stderr={}", stderr);
}
