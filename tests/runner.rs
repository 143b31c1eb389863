use chrono::Utc;
use solarlink::command::{Condition, SequenceConfig, StartMode, StepConfig};
use solarlink::config::{AppConfig, CycleConfig};
use solarlink::device::{Command, Device, DeviceKind};
use async_trait::async_trait;
use solarlink::handler::{Delivery, HandlerChain, MemoryPacketSink, PacketHandler, SinkHandler};
use solarlink::modbus::serial_mock::MockSerialPort;
use solarlink::modbus::{Request, SlaveBus};
use solarlink::packet::{Assembler, Packet, PacketCollection, SourceMetadata, UniqueIdGenerator};
use solarlink::polling::{PollOptions, SuccessOutcome};
use solarlink::runtime::{CommandOutcome, Runner};
use solarlink::{CommandEngine, SolarError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

fn rover_registers(voltage_tenths: u16) -> Vec<u16> {
    let mut registers = vec![0u16; 0x23];
    registers[0x00] = 60;
    registers[0x01] = voltage_tenths;
    registers
}

fn runner(port: &MockSerialPort, engine: CommandEngine, options: PollOptions) -> Runner<MockSerialPort> {
    Runner::new(
        SlaveBus::new(port.clone(), Duration::from_millis(20)),
        vec![
            Device::new(DeviceKind::Rover, 1, 0),
            Device::new(DeviceKind::PzemShunt, 2, 0),
        ],
        Assembler::new(
            Box::new(UniqueIdGenerator::with_instance(1)),
            SourceMetadata::default(),
        ),
        engine,
        options,
        CycleConfig {
            period_ms: 30,
            minimum_wait_ms: 5,
        },
    )
}

#[tokio::test]
async fn test_cycle_polls_dispatches_then_writes() {
    let port = MockSerialPort::new();
    let mut engine = CommandEngine::new();
    engine
        .register(SequenceConfig {
            id: "aux".into(),
            target: 1,
            start: StartMode::Automatic,
            steps: vec![StepConfig::new(
                Condition::below("battery_voltage", 12.0),
                Command::AuxOn,
            )],
        })
        .unwrap();
    let mut runner = runner(&port, engine, PollOptions::default());
    let (tx, mut rx) = mpsc::channel(4);

    port.queue_registers(1, 0x03, &rover_registers(115));
    port.queue_registers(2, 0x04, &[1150, 0, 0, 0, 0, 0, 0, 0]);
    port.queue_frame(
        &Request::WriteSingleRegister {
            register: 0x010A,
            value: 1,
        }
        .to_frame(1),
    );

    let summary = runner.run_cycle(Utc::now(), &tx).await;
    assert_eq!(summary.outcomes, vec![SuccessOutcome::Success, SuccessOutcome::Success]);
    assert!(matches!(
        summary.command,
        Some(CommandOutcome::Written(ref request)) if request.command == Command::AuxOn
    ));
    assert_eq!(port.pending_responses(), 0);
    let tx_data = port.get_tx_data();
    assert_eq!(&tx_data[tx_data.len() - 8..tx_data.len() - 2], &[0x01, 0x06, 0x01, 0x0A, 0x00, 0x01]);

    let dispatched = rx.recv().await.unwrap();
    assert!(summary.dispatched);
    assert!(Arc::ptr_eq(&dispatched, &summary.collection));
    assert_eq!(dispatched.readings().count(), 2);
    assert_eq!(dispatched.command_feedback().count(), 0);

    // the write is reported once, in the following collection
    port.queue_registers(1, 0x03, &rover_registers(131));
    port.queue_registers(2, 0x04, &[1310, 0, 0, 0, 0, 0, 0, 0]);
    let summary = runner.run_cycle(Utc::now(), &tx).await;
    assert!(summary.command.is_none());
    assert_eq!(
        summary.collection.command_feedback().collect::<Vec<_>>(),
        vec![("aux", Command::AuxOn, 1)]
    );
    assert!(summary.collection.packets.contains(&Packet::CommandFeedback {
        sequence_id: "aux".into(),
        command: Command::AuxOn,
        target: 1,
    }));

    port.queue_silence();
    port.queue_silence();
    let summary = runner.run_cycle(Utc::now(), &tx).await;
    assert_eq!(summary.collection.command_feedback().count(), 0);
}

#[tokio::test]
async fn test_failed_write_is_retried_next_cycle() {
    let port = MockSerialPort::new();
    let mut engine = CommandEngine::new();
    engine
        .register(SequenceConfig {
            id: "aux".into(),
            target: 1,
            start: StartMode::Automatic,
            steps: vec![StepConfig::new(
                Condition::below("battery_voltage", 12.0),
                Command::AuxOff,
            )],
        })
        .unwrap();
    let mut runner = runner(&port, engine, PollOptions::default());
    let (tx, _rx) = mpsc::channel(4);

    port.queue_registers(1, 0x03, &rover_registers(115));
    port.queue_silence(); // shunt
    port.queue_silence(); // write
    let summary = runner.run_cycle(Utc::now(), &tx).await;
    assert_eq!(summary.outcomes, vec![SuccessOutcome::Success, SuccessOutcome::Timeout]);
    assert!(matches!(summary.command, Some(CommandOutcome::Failed(_))));

    port.queue_silence(); // rover
    port.queue_silence(); // shunt
    port.queue_frame(
        &Request::WriteSingleRegister {
            register: 0x010A,
            value: 0,
        }
        .to_frame(1),
    );
    let summary = runner.run_cycle(Utc::now(), &tx).await;
    assert_eq!(summary.outcomes, vec![SuccessOutcome::Timeout; 2]);
    assert!(matches!(summary.command, Some(CommandOutcome::Written(_))));
}

#[tokio::test]
async fn test_error_packets_reach_the_collection() {
    let port = MockSerialPort::new();
    let options = PollOptions {
        send_error_packets: true,
        debug_modbus_timeout: true,
    };
    let mut runner = runner(&port, CommandEngine::new(), options);
    let (tx, _rx) = mpsc::channel(4);

    port.queue_exception(1, 0x03, 0x02);
    let summary = runner.run_cycle(Utc::now(), &tx).await;
    assert_eq!(
        summary.outcomes,
        vec![SuccessOutcome::SuccessWithError, SuccessOutcome::Timeout]
    );
    let errors: Vec<&String> = summary
        .collection
        .packets
        .iter()
        .filter_map(|p| match p {
            Packet::Error { device, .. } => Some(device),
            _ => None,
        })
        .collect();
    assert_eq!(errors, vec!["rover:1", "pzem_shunt:2"]);
}

#[tokio::test]
async fn test_run_until_shutdown_drains_dispatch() {
    let config = AppConfig::from_json(
        r#"{
            "serial": { "port": "/dev/null", "response_timeout_ms": 10 },
            "devices": [ { "kind": "pzem_shunt", "address": 2 } ],
            "source_id": "test",
            "cycle": { "period_ms": 20, "minimum_wait_ms": 5 }
        }"#,
    )
    .unwrap();
    let port = MockSerialPort::new();
    for _ in 0..50 {
        port.queue_registers(2, 0x04, &[1300, 10, 0, 0, 0, 0, 0, 0]);
    }
    let sink = MemoryPacketSink::new();
    let chain = HandlerChain::new().with(SinkHandler::new("memory", sink.clone()), None);
    let runner = Runner::from_config(&config, port.clone()).unwrap();

    let (stop, shutdown) = watch::channel(false);
    let task = tokio::spawn(runner.run(chain, shutdown));
    tokio::time::sleep(Duration::from_millis(150)).await;
    stop.send(true).unwrap();

    let chain = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(chain.len(), 1);
    assert!(sink.len() >= 2);

    let collections = {
        let mut sink = sink.clone();
        use solarlink::handler::PacketSink;
        sink.query(Utc::now() - chrono::Duration::minutes(1), Utc::now() + chrono::Duration::minutes(1))
            .await
            .unwrap()
    };
    assert_eq!(collections.len(), sink.len());
    assert!(collections.iter().all(|c| c.reading_for(2).is_some()));
    assert!(collections.iter().all(|c| c.packets.contains(&Packet::Source {
        source_id: "test".into()
    })));
}

/// Never finishes a delivery, like a remote store that stopped answering.
struct HangingHandler;

#[async_trait]
impl PacketHandler for HangingHandler {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn handle(&mut self, _collection: &PacketCollection) -> Result<Delivery, SolarError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Delivery::Delivered)
    }
}

struct PanickingHandler;

#[async_trait]
impl PacketHandler for PanickingHandler {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn handle(&mut self, collection: &PacketCollection) -> Result<Delivery, SolarError> {
        panic!("corrupt collection {}", collection.id);
    }
}

#[tokio::test]
async fn test_hanging_handler_does_not_stall_polling() {
    let port = MockSerialPort::new();
    let mut runner = Runner::new(
        SlaveBus::new(port, Duration::from_millis(20)),
        Vec::new(),
        Assembler::new(
            Box::new(UniqueIdGenerator::with_instance(1)),
            SourceMetadata::default(),
        ),
        CommandEngine::new(),
        PollOptions::default(),
        CycleConfig::default(),
    );
    let (tx, _worker) =
        solarlink::runtime::spawn_dispatcher(HandlerChain::new().with(HangingHandler, None));

    let mut dropped = 0;
    for _ in 0..40 {
        let summary = tokio::time::timeout(Duration::from_millis(500), runner.run_cycle(Utc::now(), &tx))
            .await
            .expect("cycle finished while the handler hangs");
        if !summary.dispatched {
            dropped += 1;
        }
    }
    assert!(dropped >= 40 - 17, "only {dropped} collections were dropped");
}

#[tokio::test]
async fn test_panicking_handler_does_not_stop_the_runner() {
    let config = AppConfig::from_json(
        r#"{
            "serial": { "port": "/dev/null", "response_timeout_ms": 10 },
            "devices": [ { "kind": "pzem_shunt", "address": 2 } ],
            "cycle": { "period_ms": 20, "minimum_wait_ms": 5 }
        }"#,
    )
    .unwrap();
    let port = MockSerialPort::new();
    for _ in 0..50 {
        port.queue_registers(2, 0x04, &[1300, 10, 0, 0, 0, 0, 0, 0]);
    }
    let sink = MemoryPacketSink::new();
    let chain = HandlerChain::new()
        .with(PanickingHandler, None)
        .with(SinkHandler::new("memory", sink.clone()), None);
    let runner = Runner::from_config(&config, port).unwrap();

    let (stop, shutdown) = watch::channel(false);
    let task = tokio::spawn(runner.run(chain, shutdown));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!task.is_finished());
    stop.send(true).unwrap();

    let chain = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(chain.len(), 2);
    assert!(sink.len() >= 2);
}

#[tokio::test]
async fn test_cycles_continue_after_dispatch_worker_is_gone() {
    let port = MockSerialPort::new();
    let mut runner = runner(&port, CommandEngine::new(), PollOptions::default());
    let (tx, rx) = mpsc::channel(4);
    drop(rx);

    for _ in 0..3 {
        port.queue_registers(1, 0x03, &rover_registers(128));
        port.queue_registers(2, 0x04, &[1280, 0, 0, 0, 0, 0, 0, 0]);
        let summary = runner.run_cycle(Utc::now(), &tx).await;
        assert!(!summary.dispatched);
        assert_eq!(summary.outcomes, vec![SuccessOutcome::Success; 2]);
    }
}
