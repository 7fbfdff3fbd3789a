/*!
# Sensors DevKit - test doubles for the system-sensors agent

Lets the agent run end to end without a broker or real hardware:
- In-memory broker recording every publish, subscribe and disconnect
- Local MQTT endpoint for exercising the real rumqttc transport
- Scripted metric reader with per-reading failure injection
- Harness wiring both into a real `BrokerSession` and `Agent`
*/

pub mod fake_broker;
pub mod mqtt_stub;
pub mod test_utils;

pub use fake_broker::{FakeBroker, FakeConnection, ReceivedPublish};
pub use mqtt_stub::{MockBroker, MockEvent, MockMessage};
pub use test_utils::{RunningAgent, ScriptedReader, TestHarness};
