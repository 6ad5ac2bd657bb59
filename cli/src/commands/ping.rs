use anyhow::Result;

use crate::remote::RemoteClient;

pub(crate) async fn cmd_ping(url: &str, json: bool) -> Result<()> {
    let client = RemoteClient::new(url)?;
    let report = client.ping().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let version = report
            .version
            .as_deref()
            .map(|v| format!(" (vitals {v})"))
            .unwrap_or_default();
        println!(
            "{}: {}{version} in {} ms",
            report.url, report.status, report.latency_ms
        );
    }
    Ok(())
}
