/*!
Test harness for the system-sensors agent

Provides:
- A scripted `MetricReader` with fixed values and injectable failures
- A real `BrokerSession` on top of `MockBroker`
- Helpers to drive connect and incoming messages, and to run an `Agent`
*/

use crate::mqtt_stub::MockBroker;
use chrono_tz::Tz;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use system_sensors::metrics::{LoadAverage, MetricReader, NetCounters};
use system_sensors::{Agent, BrokerSession, ConnectOutcome, DeviceIdentity, ReadingError, SnapshotBuilder};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Fixed readings; any of them can be switched to fail
#[derive(Debug, Clone)]
pub struct ScriptedReader {
    pub temperature: f32,
    pub disk: f32,
    pub memory: f32,
    pub cpu: f32,
    pub swap: f32,
    pub load: LoadAverage,
    pub boot_time: i64,
    pub under_voltage: bool,
    /// Served in order; the last value repeats
    net: VecDeque<NetCounters>,
    failing: Vec<&'static str>,
}

impl Default for ScriptedReader {
    fn default() -> Self {
        Self {
            temperature: 48.31,
            disk: 37.4,
            memory: 61.0,
            cpu: 12.5,
            swap: 0.0,
            load: LoadAverage {
                one: 0.25,
                five: 0.5,
                fifteen: 0.75,
            },
            boot_time: 1_700_000_000,
            under_voltage: false,
            net: VecDeque::from([NetCounters::default()]),
            failing: Vec::new(),
        }
    }
}

impl ScriptedReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the named reading fail (`"temperature"`, `"disk"`, `"memory"`,
    /// `"cpu"`, `"swap"`, `"load"`, `"boot_time"`, `"under_voltage"`, `"network"`)
    pub fn failing(mut self, reading: &'static str) -> Self {
        self.failing.push(reading);
        self
    }

    pub fn with_net_counters(mut self, counters: impl IntoIterator<Item = NetCounters>) -> Self {
        self.net = counters.into_iter().collect();
        self
    }

    fn check(&self, reading: &'static str) -> Result<(), ReadingError> {
        if self.failing.contains(&reading) {
            return Err(ReadingError::unavailable(reading, "scripted failure"));
        }
        Ok(())
    }
}

impl MetricReader for ScriptedReader {
    fn temperature(&mut self) -> Result<f32, ReadingError> {
        self.check("temperature").map(|_| self.temperature)
    }

    fn disk_usage(&mut self, _mount_point: &Path) -> Result<f32, ReadingError> {
        self.check("disk").map(|_| self.disk)
    }

    fn memory_usage(&mut self) -> Result<f32, ReadingError> {
        self.check("memory").map(|_| self.memory)
    }

    fn cpu_usage(&mut self) -> Result<f32, ReadingError> {
        self.check("cpu").map(|_| self.cpu)
    }

    fn swap_usage(&mut self) -> Result<f32, ReadingError> {
        self.check("swap").map(|_| self.swap)
    }

    fn load_average(&mut self) -> Result<LoadAverage, ReadingError> {
        self.check("load").map(|_| self.load)
    }

    fn boot_time(&mut self) -> Result<i64, ReadingError> {
        self.check("boot_time").map(|_| self.boot_time)
    }

    fn under_voltage(&mut self) -> Result<bool, ReadingError> {
        self.check("under_voltage").map(|_| self.under_voltage)
    }

    fn net_counters(&mut self) -> Result<NetCounters, ReadingError> {
        self.check("network")?;
        let current = if self.net.len() > 1 {
            self.net.pop_front()
        } else {
            self.net.front().copied()
        };
        Ok(current.unwrap_or_default())
    }
}

/// An agent running on its own task, stopped through `token`
pub struct RunningAgent {
    pub token: CancellationToken,
    pub handle: JoinHandle<anyhow::Result<()>>,
}

impl RunningAgent {
    /// Trigger graceful shutdown and wait for it to finish
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.token.cancel();
        self.handle.await?
    }
}

/// Mock broker plus a real session for one device
pub struct TestHarness {
    pub broker: MockBroker,
    pub session: Arc<BrokerSession>,
    pub timezone: Tz,
}

impl TestHarness {
    pub fn new(device_name: &str) -> anyhow::Result<Self> {
        init_tracing();
        let device = DeviceIdentity::new(device_name)?;
        let broker = MockBroker::new();
        let session = Arc::new(BrokerSession::new(Arc::new(broker.clone()), device));
        Ok(Self {
            broker,
            session,
            timezone: Tz::UTC,
        })
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Same path the transport takes when CONNACK arrives
    pub async fn connect(&self) -> anyhow::Result<()> {
        self.session.mark_connecting();
        self.session
            .on_connection_established(ConnectOutcome::Accepted)
            .await?;
        Ok(())
    }

    /// Deliver a publish as if the broker forwarded it
    pub async fn simulate_incoming(&self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
        self.session.on_message_received(topic, payload).await?;
        info!("Simulated incoming on {}", topic);
        Ok(())
    }

    pub fn agent(&self, reader: ScriptedReader, interval: Duration) -> Agent {
        let builder = SnapshotBuilder::new(Box::new(reader), self.timezone);
        Agent::new(self.session.clone(), Arc::new(builder), interval)
    }

    pub fn spawn_agent(&self, reader: ScriptedReader, interval: Duration) -> RunningAgent {
        let agent = self.agent(reader, interval);
        let token = CancellationToken::new();
        let handle = tokio::spawn(agent.run_until(token.clone()));
        RunningAgent { token, handle }
    }

    /// Poll until `count` messages reached `topic`, for at most `budget`
    pub async fn wait_for_messages(&self, topic: &str, count: usize, budget: Duration) -> bool {
        let step = Duration::from_millis(10);
        let mut waited = Duration::ZERO;
        while waited <= budget {
            if self.broker.find_messages_by_topic(topic).len() >= count {
                return true;
            }
            tokio::time::sleep(step).await;
            waited += step;
        }
        false
    }

    /// Assert a top-level string field of the last JSON payload on `topic`
    pub fn assert_field_equals(&self, topic: &str, field: &str, expected: &str) -> anyhow::Result<()> {
        let Some(msg) = self.broker.get_last_json_message::<Value>(topic)? else {
            anyhow::bail!("no message on {}", topic);
        };
        match msg.get(field) {
            Some(Value::String(actual)) if actual == expected => Ok(()),
            Some(actual) => anyhow::bail!("field '{}': expected {:?}, got {}", field, expected, actual),
            None => anyhow::bail!("field '{}' missing on {}", field, topic),
        }
    }

    pub fn get_stats(&self) -> TestStats {
        let messages = self.broker.get_published_messages();
        let mut topic_counts = HashMap::new();
        for msg in &messages {
            *topic_counts.entry(msg.topic.clone()).or_insert(0) += 1;
        }
        TestStats {
            total_messages: messages.len(),
            topic_counts,
            subscriptions: self.broker.get_subscriptions(),
        }
    }
}

#[derive(Debug)]
pub struct TestStats {
    pub total_messages: usize,
    pub topic_counts: HashMap<String, usize>,
    pub subscriptions: Vec<String>,
}

/// Test-writer subscriber; safe to call from every test
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("system_sensors=debug,sensors_devkit=debug")
        .with_test_writer()
        .try_init();
}
