#![allow(clippy::expect_used, clippy::unwrap_used, dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use assert_cmd::Command;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CMD_TIMEOUT: Duration = Duration::from_secs(30);

/// Isolated config and archive for one test.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: PathBuf,
}

impl TestEnv {
    /// Config pointing at `endpoint` with a fast retry budget.
    pub fn new(endpoint: Option<&str>) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let config = dir.path().join("config.toml");
        let site = endpoint.map_or_else(String::new, |e| format!("[site]\nendpoint = \"{e}\"\n\n"));
        std::fs::write(
            &config,
            format!("{site}[retry]\nattempts = 2\ndelay_ms = 0\n\n[fetch]\ntimeout_secs = 5\n"),
        )
        .unwrap();
        Self { dir, config }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("archive")
    }

    /// A `wikimirror` command bound to this environment.
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("wikimirror").unwrap();
        cmd.timeout(CMD_TIMEOUT);
        cmd.env("WIKIMIRROR_CONFIG", &self.config);
        cmd.env("WIKIMIRROR_DATA_DIR", self.data_dir());
        cmd.env_remove("WIKIMIRROR_ENDPOINT");
        cmd.env("NO_COLOR", "1");
        cmd
    }

    pub fn json(&self, args: &[&str]) -> serde_json::Value {
        let out = self
            .cmd()
            .args(args)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        serde_json::from_slice(&out).unwrap()
    }
}

pub fn revision_path(data_dir: &Path, bucket: &str, page: &str, number: u32) -> PathBuf {
    data_dir
        .join(bucket)
        .join(page)
        .join(format!("V{number:04}"))
}

fn row(number: u32, element_id: &str, date: &str) -> serde_json::Value {
    json!({
        "number": format!("{number}."),
        "element_id": element_id,
        "flags": if number == 1 { "N" } else { "S" },
        "author": "Jane Doe",
        "date": date,
        "comment": format!("edit {number}")
    })
}

/// A two-page wiki: `start` (2 revisions) and `about` (1 revision).
pub async fn mount_site(server: &MockServer) {
    let pages = [
        ("start", "2020-02-01", vec![row(2, "s2", "2020-02-01"), row(1, "s1", "2020-01-15")]),
        ("about", "2019-06-01", vec![row(1, "a1", "2019-06-01")]),
    ];

    Mock::given(method("GET"))
        .and(path("/api/pages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "name": "start", "updated": "2020-02-01" },
            { "name": "about", "updated": "2019-06-01" }
        ])))
        .mount(server)
        .await;

    for (name, updated, rows) in pages {
        Mock::given(method("GET"))
            .and(path(format!("/api/pages/{name}")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "name": name, "updated": updated })),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/api/pages/{name}/revisions")))
            .and(query_param("page", "1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "rows": rows, "has_more": false })),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/api/pages/{name}/files")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(server)
            .await;
    }

    for (name, id, text) in [
        ("start", "s1", "Welcome\n"),
        ("start", "s2", "Welcome to the wiki\n"),
        ("about", "a1", "About us\n"),
    ] {
        Mock::given(method("GET"))
            .and(path(format!("/api/pages/{name}/revisions/{id}/source")))
            .respond_with(ResponseTemplate::new(200).set_body_string(text))
            .mount(server)
            .await;
    }
}

pub fn endpoint(server: &MockServer) -> String {
    format!("{}/api", server.uri())
}
