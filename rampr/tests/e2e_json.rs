use std::path::Path;
use std::process::Command;

use anyhow::Context as _;
use rampr_testserver::{TEST_PASSWORD, TEST_USERNAME, TestServer};
use serde_json::Value;

#[tokio::test]
async fn json_output_and_summary_export() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let base_url = server.base_url().to_string();

    let dir = tempfile::tempdir().context("tempdir")?;
    let export = dir.path().join("out/summary.json");
    let export_arg = export.clone();

    let script_path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/scripts/user_flow.yaml");
    let exe = env!("CARGO_BIN_EXE_rampr");

    let out = tokio::task::spawn_blocking(move || {
        Command::new(exe)
            .arg("run")
            .arg(&script_path)
            .arg("--output")
            .arg("json")
            .arg("--summary-export")
            .arg(&export_arg)
            .arg("--env")
            .arg(format!("USERNAME={TEST_USERNAME}"))
            .arg("--env")
            .arg(format!("PASSWORD={TEST_PASSWORD}"))
            .env("RAMPR_BASE_URL", &base_url)
            .env_remove("RUST_LOG")
            .output()
    })
    .await
    .context("spawn_blocking join")?
    .context("run rampr binary")?;

    let logins = server.stats().logins_ok();
    let unauthorized = server.stats().products_unauthorized();
    server.shutdown().await;

    let stdout = String::from_utf8_lossy(&out.stdout);
    anyhow::ensure!(
        out.status.code() == Some(0),
        "expected success, got {:?}\nstdout:\n{stdout}\nstderr:\n{}",
        out.status.code(),
        String::from_utf8_lossy(&out.stderr)
    );
    anyhow::ensure!(logins == 1, "setup should log in once, got {logins}");
    anyhow::ensure!(unauthorized == 0, "token was not propagated");

    let lines: Vec<Value> = stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()
        .context("stdout is NDJSON")?;

    let summary = lines.last().context("no summary line")?;
    anyhow::ensure!(summary["kind"] == "summary", "last line: {summary}");
    anyhow::ensure!(summary["overall"] == "passed");
    anyhow::ensure!(summary["thresholds"]["http_req_failed"] == "passing");
    anyhow::ensure!(summary["checks"]["products status 200"]["fail"] == 0);
    anyhow::ensure!(summary["requests"]["count"].as_u64().unwrap_or(0) > 1);

    let progress = lines.iter().filter(|l| l["kind"] == "progress").count();
    anyhow::ensure!(progress > 0, "expected progress lines");

    let exported: Value = serde_json::from_slice(
        &std::fs::read(&export).context("summary export was not written")?,
    )
    .context("summary export is JSON")?;
    anyhow::ensure!(exported["overall"] == "passed");
    anyhow::ensure!(exported["requests"]["count"] == summary["requests"]["count"]);
    anyhow::ensure!(exported.get("kind").is_none());

    Ok(())
}
