//! End-to-end daemon tests over real loopback sockets.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use sg_config::DaemonConfig;
use sg_runtime::Daemon;

const CONFIG: &str = r#"
[worker]
listen = "tcp://127.0.0.1:0"
task_timeout = "5s"

[scan.metric]
name = "default"

[scan.metric.actions]
reject = 15.0

[scan.symbols.TEST_A]
score = 5.0

[scan.symbols.TEST_B]
score = 11.0

[[scan.rules]]
symbol = "TEST_A"
header = "Subject"
pattern = "(?i)offer"

[[scan.rules]]
symbol = "TEST_B"
body = true
pattern = "(?i)cheap pills"

[fuzzy]
listen = "udp://127.0.0.1:0"

[[stat.classifiers]]
name = "bayes"
min_tokens = 3

[[stat.classifiers.statfiles]]
label = "bayes_spam"
spam = true

[[stat.classifiers.statfiles]]
label = "bayes_ham"
spam = false
"#;

const SPAMMY_BODY: &str = "Limited offer inside! Get cheap pills today, cheap pills tomorrow,\r\n\
guaranteed winner prize claim now.\r\n";

fn scan_message() -> String {
    format!(
        "From: seller@example.org\r\nTo: victim@example.net\r\nSubject: Best OFFER ever\r\n\r\n{SPAMMY_BODY}"
    )
}

async fn start_daemon() -> Daemon {
    let config: DaemonConfig = CONFIG.parse().unwrap();
    Daemon::start(config).await.unwrap()
}

async fn roundtrip(addr: std::net::SocketAddr, request: &[u8]) -> String {
    let mut conn = TcpStream::connect(addr).await.unwrap();
    conn.write_all(request).await.unwrap();
    conn.shutdown().await.unwrap();
    let mut reply = String::new();
    conn.read_to_string(&mut reply).await.unwrap();
    reply
}

fn framed(cmd: &str, body: &str, extra_headers: &str) -> Vec<u8> {
    format!(
        "{cmd} RSPAMC/1.3\r\nContent-Length: {}\r\n{extra_headers}\r\n{body}",
        body.len()
    )
    .into_bytes()
}

// Scenario: two symbols fire, 5 + 11 crosses the reject threshold.
#[tokio::test]
async fn symbols_request_scores_and_rejects() {
    let daemon = start_daemon().await;
    let message = scan_message();
    let request = framed("SYMBOLS", &message, "Queue-Id: T1\r\n");

    let reply = roundtrip(daemon.scan_addr(), &request).await;
    assert!(reply.starts_with("RSPAMD/1.3 0 EX_OK\r\n"), "{reply}");
    assert!(
        reply.contains("Metric: default; True; 16.00 / 15.00"),
        "{reply}"
    );
    assert!(reply.contains("Action: reject"), "{reply}");
    assert!(reply.contains("Symbol: TEST_A(5.00)"), "{reply}");
    assert!(reply.contains("Symbol: TEST_B(11.00)"), "{reply}");

    daemon.shutdown();
    daemon.wait().await.unwrap();
}

#[tokio::test]
async fn check_request_omits_symbols() {
    let daemon = start_daemon().await;
    let request = framed("CHECK", &scan_message(), "");
    let reply = roundtrip(daemon.scan_addr(), &request).await;
    assert!(reply.contains("Metric: default; True;"), "{reply}");
    assert!(!reply.contains("Symbol:"), "{reply}");
    daemon.shutdown();
    daemon.wait().await.unwrap();
}

#[tokio::test]
async fn ping_and_controller_commands() {
    let daemon = start_daemon().await;
    let addr = daemon.scan_addr();

    let reply = roundtrip(addr, b"PING RSPAMC/1.3\r\n\r\n").await;
    assert!(reply.contains("Pong"), "{reply}");

    // Scan something so the counters have content.
    let _ = roundtrip(addr, &framed("CHECK", &scan_message(), "Queue-Id: Q7\r\n")).await;

    let reply = roundtrip(addr, b"STAT RSPAMC/1.3\r\n\r\n").await;
    assert!(reply.contains("\"scanned\":"), "{reply}");

    let reply = roundtrip(addr, b"COUNTERS RSPAMC/1.3\r\n\r\n").await;
    assert!(reply.contains("\"history\":"), "{reply}");
    assert!(reply.contains("Q7"), "{reply}");

    let reply = roundtrip(addr, b"UPTIME RSPAMC/1.3\r\n\r\n").await;
    assert!(reply.contains("\"uptime\":"), "{reply}");

    daemon.shutdown();
    daemon.wait().await.unwrap();
}

#[tokio::test]
async fn spamc_banner_gets_spamd_reply() {
    let daemon = start_daemon().await;
    let message = scan_message();
    let request = format!(
        "CHECK SPAMC/1.5\r\nContent-Length: {}\r\n\r\n{message}",
        message.len()
    );
    let reply = roundtrip(daemon.scan_addr(), request.as_bytes()).await;
    assert!(reply.starts_with("SPAMD/1.5 0 EX_OK\r\n"), "{reply}");
    assert!(reply.contains("Spam: True ; 16.0 / 15.0"), "{reply}");
    daemon.shutdown();
    daemon.wait().await.unwrap();
}

#[tokio::test]
async fn learn_twice_yields_ignore() {
    let daemon = start_daemon().await;
    let addr = daemon.scan_addr();
    let message = scan_message();

    let request = framed("LEARN", &message, "Classifier: bayes\r\nValue: 1\r\n");
    let reply = roundtrip(addr, &request).await;
    assert!(reply.contains("learn ok"), "{reply}");

    let request = framed("LEARN", &message, "Classifier: bayes\r\nValue: 1\r\n");
    let reply = roundtrip(addr, &request).await;
    assert!(reply.starts_with("RSPAMD/1.3 208"), "{reply}");
    assert!(reply.contains("already learned"), "{reply}");

    daemon.shutdown();
    daemon.wait().await.unwrap();
}

#[tokio::test]
async fn learn_unknown_classifier_is_404() {
    let daemon = start_daemon().await;
    let request = framed("LEARN", &scan_message(), "Classifier: nonexistent\r\n");
    let reply = roundtrip(daemon.scan_addr(), &request).await;
    assert!(reply.starts_with("RSPAMD/1.3 404"), "{reply}");
    daemon.shutdown();
    daemon.wait().await.unwrap();
}

#[tokio::test]
async fn fuzzy_add_then_scan_flags_message() {
    let daemon = start_daemon().await;
    let addr = daemon.scan_addr();
    let message = scan_message();

    let request = framed("FUZZY_ADD", &message, "Flag: 7\r\nValue: 3\r\n");
    let reply = roundtrip(addr, &request).await;
    assert!(reply.contains("fuzzy update ok"), "{reply}");

    let reply = roundtrip(addr, &framed("SYMBOLS", &message, "")).await;
    assert!(reply.contains("Symbol: FUZZY_DENIED"), "{reply}");

    daemon.shutdown();
    daemon.wait().await.unwrap();
}

#[tokio::test]
async fn fuzzy_shingles_catch_near_duplicates() {
    let daemon = start_daemon().await;
    let addr = daemon.scan_addr();

    let long_body = "unbeatable offer on cheap pills with guaranteed delivery \
worldwide no prescription needed simply click the link below and claim your \
exclusive discount before the deal expires tonight act fast stocks are low\r\n";
    let original = format!("Subject: grand OFFER\r\n\r\n{long_body}");
    let request = framed("FUZZY_ADD", &original, "Flag: 2\r\nValue: 1\r\n");
    let reply = roundtrip(addr, &request).await;
    assert!(reply.contains("fuzzy update ok"), "{reply}");

    // One word changed: the digest differs, the shingle vote still wins.
    let tweaked_body = long_body.replace("tonight", "today");
    let tweaked = format!("Subject: grand OFFER\r\n\r\n{tweaked_body}");
    let reply = roundtrip(addr, &framed("SYMBOLS", &tweaked, "")).await;
    assert!(reply.contains("Symbol: FUZZY_DENIED"), "{reply}");

    daemon.shutdown();
    daemon.wait().await.unwrap();
}

#[tokio::test]
async fn oversize_body_rejected_with_413() {
    let config_small: DaemonConfig = CONFIG
        .replace("task_timeout = \"5s\"", "task_timeout = \"5s\"\nmax_message_size = \"1KB\"")
        .parse()
        .unwrap();
    let daemon = Daemon::start(config_small).await.unwrap();

    let body = "x".repeat(4096);
    let request = framed("CHECK", &body, "");
    let reply = roundtrip(daemon.scan_addr(), &request).await;
    assert!(reply.contains("413"), "{reply}");
    assert!(reply.contains("message too large"), "{reply}");

    daemon.shutdown();
    daemon.wait().await.unwrap();
}

#[tokio::test]
async fn malformed_request_line_is_a_protocol_error() {
    let daemon = start_daemon().await;
    let reply = roundtrip(daemon.scan_addr(), b"NOT A REQUEST\r\n\r\n").await;
    assert!(reply.contains("400"), "{reply}");
    assert!(reply.contains("Error: protocol"), "{reply}");
    daemon.shutdown();
    daemon.wait().await.unwrap();
}

#[tokio::test]
async fn add_symbol_and_add_action_mutate_runtime() {
    let daemon = start_daemon().await;
    let addr = daemon.scan_addr();

    // Lower TEST_B so the two rules stop crossing the reject line.
    let reply = roundtrip(
        addr,
        b"ADD_SYMBOL RSPAMC/1.3\r\nSymbol: TEST_B\r\nScore: 1.0\r\n\r\n",
    )
    .await;
    assert!(reply.contains("symbol updated"), "{reply}");

    let reply = roundtrip(addr, &framed("CHECK", &scan_message(), "")).await;
    assert!(reply.contains("; 6.00 / 15.00"), "{reply}");
    assert!(reply.contains("Action: no action"), "{reply}");

    // Then pull the reject threshold below the score.
    let reply = roundtrip(
        addr,
        b"ADD_ACTION RSPAMC/1.3\r\nAction: reject\r\nScore: 5.0\r\n\r\n",
    )
    .await;
    assert!(reply.contains("action updated"), "{reply}");

    let reply = roundtrip(addr, &framed("CHECK", &scan_message(), "")).await;
    assert!(reply.contains("Action: reject"), "{reply}");
    assert!(reply.contains("; 6.00 / 5.00"), "{reply}");

    // Unknown symbol is a 404.
    let reply = roundtrip(
        addr,
        b"ADD_SYMBOL RSPAMC/1.3\r\nSymbol: NO_SUCH\r\nScore: 1.0\r\n\r\n",
    )
    .await;
    assert!(reply.starts_with("RSPAMD/1.3 404"), "{reply}");

    daemon.shutdown();
    daemon.wait().await.unwrap();
}

#[tokio::test]
async fn skip_replies_without_scanning() {
    let daemon = start_daemon().await;
    let reply = roundtrip(daemon.scan_addr(), &framed("SKIP", &scan_message(), "")).await;
    assert!(reply.contains("Metric: default; False; 0.00"), "{reply}");
    assert!(reply.contains("Action: no action"), "{reply}");
    daemon.shutdown();
    daemon.wait().await.unwrap();
}
