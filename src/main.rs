// MIT License - Copyright (c) 2026 Peter Wright
// MQTT bridge

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use sia_receiver::entities::{entities_for, SharedEntity};
use sia_receiver::{
    Account, ClockSkew, DecodedEvent, EntityHandler, EntityKind, EntityUpdate, ReceiverConfig,
    SiaReceiver, SubscriptionFilter, TransportMode,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "sia2mqtt")]
#[command(about = "Receive SIA DC-09 alarm reports and publish them to MQTT")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(default)]
    receiver: ReceiverToml,
    accounts: Vec<AccountToml>,
    mqtt: MqttToml,
}

#[derive(Debug, Deserialize)]
struct ReceiverToml {
    #[serde(default = "default_bind_address")]
    bind_address: IpAddr,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_transport")]
    transport: String,
    #[serde(default)]
    queue_capacity: Option<usize>,
    #[serde(default)]
    worker_capacity: Option<usize>,
    #[serde(default)]
    ack_timeout_ms: Option<u64>,
    #[serde(default)]
    udp_reassembly_timeout_ms: Option<u64>,
    #[serde(default)]
    max_frame_size: Option<usize>,
}

impl Default for ReceiverToml {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            transport: default_transport(),
            queue_capacity: None,
            worker_capacity: None,
            ack_timeout_ms: None,
            udp_reassembly_timeout_ms: None,
            max_frame_size: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AccountToml {
    id: String,
    /// AES key (16, 24 or 32 characters); omit for cleartext
    #[serde(default)]
    key: Option<String>,
    #[serde(default = "default_zones")]
    zones: u32,
    #[serde(default)]
    clock_skew_past_secs: Option<u64>,
    #[serde(default)]
    clock_skew_future_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default = "default_publish_topic")]
    publish_topic: String,
    /// How long to wait for retained state at start-up
    #[serde(default = "default_restore_timeout")]
    restore_timeout_ms: u64,
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_port() -> u16 {
    7777
}
fn default_transport() -> String {
    "tcp".to_string()
}
fn default_zones() -> u32 {
    1
}
fn default_client_id() -> String {
    "sia2mqtt".to_string()
}
fn default_publish_topic() -> String {
    "sia".to_string()
}
fn default_restore_timeout() -> u64 {
    2000
}

fn parse_transport(value: &str) -> Result<TransportMode> {
    match value.to_ascii_lowercase().as_str() {
        "tcp" => Ok(TransportMode::Tcp),
        "udp" => Ok(TransportMode::Udp),
        "both" => Ok(TransportMode::Both),
        other => bail!("Unknown transport '{other}', expected tcp, udp or both"),
    }
}

fn build_account(entry: &AccountToml) -> Account {
    let mut builder = Account::builder(&entry.id).zones(entry.zones);
    if let Some(key) = &entry.key {
        builder = builder.key(key);
    }
    if entry.clock_skew_past_secs.is_some() || entry.clock_skew_future_secs.is_some() {
        let default = ClockSkew::default();
        builder = builder.clock_skew(ClockSkew::new(
            entry
                .clock_skew_past_secs
                .map_or(default.past, Duration::from_secs),
            entry
                .clock_skew_future_secs
                .map_or(default.future, Duration::from_secs),
        ));
    }
    builder.build()
}

fn build_receiver_config(config: &Config) -> Result<ReceiverConfig> {
    let receiver = &config.receiver;
    let mut builder = ReceiverConfig::builder()
        .bind_address(receiver.bind_address)
        .port(receiver.port)
        .transport(parse_transport(&receiver.transport)?)
        .accounts(config.accounts.iter().map(build_account));
    if let Some(capacity) = receiver.queue_capacity {
        builder = builder.queue_capacity(capacity);
    }
    if let Some(capacity) = receiver.worker_capacity {
        builder = builder.worker_capacity(capacity);
    }
    if let Some(ms) = receiver.ack_timeout_ms {
        builder = builder.ack_timeout_ms(ms);
    }
    if let Some(ms) = receiver.udp_reassembly_timeout_ms {
        builder = builder.udp_reassembly_timeout_ms(ms);
    }
    if let Some(size) = receiver.max_frame_size {
        builder = builder.max_frame_size(size);
    }
    let receiver_config = builder.build();
    receiver_config
        .validate()
        .context("Invalid receiver configuration")?;
    Ok(receiver_config)
}

fn load_config(path: &str) -> Result<(Config, ReceiverConfig)> {
    let text = std::fs::read_to_string(path).context("Failed to read config file")?;
    let config: Config = toml::from_str(&text).context("Failed to parse config file")?;
    let receiver_config = build_receiver_config(&config)?;
    parse_mqtt_url(&config.mqtt.url)?;
    Ok((config, receiver_config))
}

// ---------------------------------------------------------------------------
// MQTT message types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct MqttEntityState<'a> {
    now: u64,
    op: &'static str,
    account: &'a str,
    zone: u32,
    state: &'a str,
    available: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MqttEvent<'a> {
    now: u64,
    op: &'static str,
    account: &'a str,
    zone: u32,
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'static str>,
    qualifier: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    sequence: u16,
    encrypted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    panel_time: Option<String>,
}

/// Retained state read back from the broker.
#[derive(Deserialize)]
struct RetainedState {
    state: String,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

fn entity_topic(prefix: &str, account: &str, zone: u32, kind: EntityKind) -> String {
    format!("{prefix}/{account}/{zone}/{}", kind.as_str())
}

fn entity_op(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Alarm => "ALARM",
        EntityKind::Log => "LOG",
    }
}

/// Split `<prefix>/<account>/<zone>/<kind>` back into its parts.
fn parse_entity_topic<'a>(prefix: &str, topic: &'a str) -> Option<(&'a str, u32, &'a str)> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let mut parts = rest.split('/');
    let account = parts.next()?;
    let zone = parts.next()?.parse().ok()?;
    let kind = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((account, zone, kind))
}

async fn publish_json(client: &AsyncClient, topic: &str, payload: &impl Serialize, retain: bool) {
    match serde_json::to_string(payload) {
        Ok(json) => {
            if let Err(e) = client.publish(topic, QoS::AtLeastOnce, retain, json).await {
                error!("Failed to publish to {topic}: {e}");
            }
        }
        Err(e) => error!("Failed to serialize MQTT payload: {e}"),
    }
}

async fn publish_entity_update(client: &AsyncClient, prefix: &str, update: &EntityUpdate) {
    let msg = MqttEntityState {
        now: now_epoch_ms(),
        op: entity_op(update.kind),
        account: &update.account,
        zone: update.zone,
        state: &update.state,
        available: update.available,
    };
    let topic = entity_topic(prefix, &update.account, update.zone, update.kind);
    publish_json(client, &topic, &msg, true).await;
}

async fn publish_event(client: &AsyncClient, prefix: &str, event: &DecodedEvent) {
    let msg = MqttEvent {
        now: now_epoch_ms(),
        op: "EVENT",
        account: &event.account,
        zone: event.zone,
        code: event.code.as_str(),
        description: event.description(),
        qualifier: event.qualifier.as_str(),
        unit: event.unit,
        user: event.user,
        message: event.message.as_deref(),
        sequence: event.sequence,
        encrypted: event.is_encrypted(),
        panel_time: event.panel_time.map(|t| t.to_rfc3339()),
    };
    let topic = format!("{prefix}/{}/events", event.account);
    publish_json(client, &topic, &msg, false).await;
}

/// Collect retained entity states until the broker goes quiet or the
/// deadline passes. Keys are `(account, zone, kind)`.
async fn restore_retained(
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    prefix: &str,
    timeout: Duration,
) -> HashMap<(String, u32, String), String> {
    let mut restored = HashMap::new();
    let filters = [format!("{prefix}/+/+/alarm"), format!("{prefix}/+/+/log")];
    for filter in &filters {
        if let Err(e) = client.subscribe(filter, QoS::AtLeastOnce).await {
            warn!("Failed to subscribe to {filter}: {e}");
        }
    }

    let deadline = Instant::now() + timeout;
    loop {
        let polled = tokio::time::timeout_at(deadline, eventloop.poll()).await;
        match polled {
            Err(_) => break,
            Ok(Ok(Event::Incoming(Packet::Publish(msg)))) => {
                let Some((account, zone, kind)) = parse_entity_topic(prefix, &msg.topic) else {
                    continue;
                };
                match serde_json::from_slice::<RetainedState>(&msg.payload) {
                    Ok(retained) => {
                        debug!("Restored {}: {}", msg.topic, retained.state);
                        restored.insert(
                            (account.to_string(), zone, kind.to_string()),
                            retained.state,
                        );
                    }
                    Err(e) => warn!("Ignoring retained state on {}: {e}", msg.topic),
                }
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!("MQTT error while restoring state: {e}");
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }

    for filter in &filters {
        if let Err(e) = client.unsubscribe(filter).await {
            warn!("Failed to unsubscribe from {filter}: {e}");
        }
    }
    info!("Restored {} retained entity state(s)", restored.len());
    restored
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=sia_receiver=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();
    let (mut config, mut receiver_config) = load_config(&cli.config)?;

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        let (mqtt_host, mqtt_port) = parse_mqtt_url(&config.mqtt.url)?;
        let publish_topic = config.mqtt.publish_topic.clone();

        // Set up MQTT
        let mut mqtt_opts = MqttOptions::new(&config.mqtt.client_id, &mqtt_host, mqtt_port);
        mqtt_opts.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 256);
        info!("MQTT: connecting to {mqtt_host}:{mqtt_port}");

        let restored = restore_retained(
            &client,
            &mut eventloop,
            &publish_topic,
            Duration::from_millis(config.mqtt.restore_timeout_ms),
        )
        .await;

        // Entities and their subscriptions
        let mut receiver = SiaReceiver::new(receiver_config.clone())?;
        let (update_tx, mut update_rx) = mpsc::channel::<EntityUpdate>(256);
        for account in &receiver_config.accounts {
            for mut entity in entities_for(&account.id, account.zones) {
                let key = (
                    entity.account().to_string(),
                    entity.zone(),
                    entity.kind().as_str().to_string(),
                );
                entity.handle_last_state(restored.get(&key).map(String::as_str));
                let filter = entity.filter();
                let shared: SharedEntity = Arc::new(Mutex::new(entity));
                receiver.subscribe(filter, EntityHandler::new(shared, update_tx.clone()))?;
            }
        }
        drop(update_tx);
        let (_events_handle, mut event_rx) =
            receiver.subscribe_channel(SubscriptionFilter::all(), 256)?;

        receiver
            .start()
            .await
            .context("Failed to start SIA receiver")?;

        // Task 1: entity state publisher
        let client_updates = client.clone();
        let topic_updates = publish_topic.clone();
        let update_handle = tokio::spawn(async move {
            while let Some(update) = update_rx.recv().await {
                info!(
                    "Account {} zone {} {}: {}",
                    update.account,
                    update.zone,
                    update.kind.as_str(),
                    update.state
                );
                publish_entity_update(&client_updates, &topic_updates, &update).await;
            }
        });

        // Task 2: raw event publisher
        let client_events = client.clone();
        let topic_events = publish_topic.clone();
        let event_handle = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                debug!(
                    "Event {} from account {} zone {}",
                    event.code, event.account, event.zone
                );
                publish_event(&client_events, &topic_events, &event).await;
            }
        });

        // Task 3: MQTT event loop
        let mqtt_handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT: connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT event loop error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        // Wait for a signal
        info!("MQTT bridge running. Send SIGHUP to reload, SIGINT/SIGTERM to stop.");
        let restart = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                false
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                false
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading config and restarting receiver...");
                true
            }
        };

        receiver.shutdown().await;
        update_handle.abort();
        event_handle.abort();
        mqtt_handle.abort();
        if let Err(e) = client.disconnect().await {
            debug!("MQTT disconnect: {e}");
        }

        if !restart {
            break;
        }

        // Reload config from disk; keep previous config on failure
        info!("Reloading config from {}", cli.config);
        match load_config(&cli.config) {
            Ok((new_config, new_receiver_config)) => {
                config = new_config;
                receiver_config = new_receiver_config;
                info!("Config reloaded successfully");
            }
            Err(e) => warn!("Failed to reload config, keeping previous: {e:#}"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port).
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port_str) = stripped
        .rsplit_once(':')
        .context("MQTT URL must be in format mqtt://host:port")?;

    let port: u16 = port_str.parse().context("Invalid MQTT port number")?;

    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[receiver]
port = 7000
transport = "both"
ack_timeout_ms = 1000

[[accounts]]
id = "aaa"
key = "0123456789ABCDEF"
zones = 2
clock_skew_past_secs = 120

[[accounts]]
id = "1234"

[mqtt]
url = "mqtt://localhost:1883"
"#;

    #[test]
    fn test_parse_mqtt_url() {
        assert_eq!(
            parse_mqtt_url("mqtt://broker:1883").unwrap(),
            ("broker".to_string(), 1883)
        );
        assert_eq!(
            parse_mqtt_url("tcp://10.0.0.2:8883").unwrap(),
            ("10.0.0.2".to_string(), 8883)
        );
        assert!(parse_mqtt_url("mqtt://broker").is_err());
        assert!(parse_mqtt_url("mqtt://broker:port").is_err());
    }

    #[test]
    fn test_config_parsing() {
        let config: Config = toml::from_str(CONFIG).unwrap();
        let receiver = build_receiver_config(&config).unwrap();
        assert_eq!(receiver.port, 7000);
        assert_eq!(receiver.transport, TransportMode::Both);
        assert_eq!(receiver.ack_timeout_ms, 1000);
        assert_eq!(receiver.accounts.len(), 2);

        let keyed = &receiver.accounts[0];
        assert_eq!(keyed.id, "AAA");
        assert!(keyed.is_encrypted());
        assert_eq!(keyed.zones, 2);
        assert_eq!(keyed.clock_skew.past, Duration::from_secs(120));
        assert_eq!(keyed.clock_skew.future, ClockSkew::default().future);

        let plain = &receiver.accounts[1];
        assert!(!plain.is_encrypted());
        assert_eq!(plain.zones, 1);
        assert_eq!(config.mqtt.client_id, "sia2mqtt");
        assert_eq!(config.mqtt.publish_topic, "sia");
    }

    #[test]
    fn test_config_rejects_bad_transport() {
        let text = CONFIG.replace("\"both\"", "\"serial\"");
        let config: Config = toml::from_str(&text).unwrap();
        assert!(build_receiver_config(&config).is_err());
    }

    #[test]
    fn test_parse_entity_topic() {
        assert_eq!(
            parse_entity_topic("sia", "sia/AAA/3/alarm"),
            Some(("AAA", 3, "alarm"))
        );
        assert_eq!(parse_entity_topic("sia", "sia/AAA/x/alarm"), None);
        assert_eq!(parse_entity_topic("sia", "sia/AAA/events"), None);
        assert_eq!(parse_entity_topic("sia", "other/AAA/1/log"), None);
    }
}
