//! Search every partition of a topic for a substring
//!
//! Usage: search_topic <brokers> <topic> <needle> [--all]
//!
//! Credentials and certificates are read from the environment
//! (`KCLI_USERNAME`, `KCLI_PASSWORD`, `KCLI_CERT_FILE`, `KCLI_KEY_FILE`,
//! `KCLI_CA_CERT_FILE`).

use kcli_client::*;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        eprintln!("usage: search_topic <brokers> <topic> <needle> [--all]");
        std::process::exit(2);
    }
    let brokers: Vec<&str> = args[0].split(',').collect();
    let topic = &args[1];
    let needle = &args[2];
    let first_only = !args.iter().any(|a| a == "--all");

    let config = ClientConfigBuilder::new()
        .brokers(brokers)
        .poll_timeout(Duration::from_secs(5))
        .concurrency(8)
        .security(SecurityConfig::from_env())
        .build();
    let client = KcliClient::connect(config).await?;

    let partitions = client.describe_topic(topic).await?;
    println!("{} has {} partitions", topic, partitions.len());
    for p in &partitions {
        println!("   partition {}: offsets {}..{}", p.partition, p.start, p.end);
    }

    let hits = client
        .search_topic(&partitions, needle, first_only, |done, total| {
            println!("   searched {}/{} partitions", done + 1, total);
        })
        .await?;

    if hits.is_empty() {
        println!("No message contains '{}'", needle);
    }
    for hit in &hits {
        let mut lines = Vec::new();
        client.fetch(hit, 1, |line| lines.push(line)).await?;
        println!(
            "Match in partition {} at offset {}: {}",
            hit.partition,
            hit.offset,
            lines.first().map(String::as_str).unwrap_or("<unavailable>")
        );
    }

    let metrics = client.metrics().snapshot();
    println!(
        "Read {} messages ({} bytes), {} poll timeouts",
        metrics.messages_read, metrics.bytes_read, metrics.poll_timeouts
    );

    client.close().await?;
    Ok(())
}
