//! Loopback tests: telemetry in through the bridge's sample queue, registers
//! out through a real Modbus TCP connection.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use voltage_sunspec::ferroamp::decode_ehub;
use voltage_sunspec::{
    Bridge, BridgeConfig, ModbusTcpClient, PduBuilder, Sample, SunspecError, SunspecResult,
    TelemetryKey,
};

const TIMEOUT: Duration = Duration::from_secs(2);

const INVERTER_W: u16 = 40092;
const INVERTER_HZ: u16 = 40094;
const INVERTER_PF: u16 = 40100;
const INVERTER_ST: u16 = 40118;
const METER_W: u16 = 40160;

struct Running {
    addr: SocketAddr,
    samples: mpsc::Sender<Sample>,
    shutdown: CancellationToken,
    task: JoinHandle<SunspecResult<()>>,
}

impl Running {
    async fn client(&self) -> ModbusTcpClient {
        ModbusTcpClient::new(self.addr, TIMEOUT).await.unwrap()
    }

    async fn push(&self, sample: Sample) {
        self.samples.send(sample).await.unwrap();
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.task.await.unwrap().unwrap();
    }
}

async fn start() -> Running {
    let bridge = Bridge::new(BridgeConfig::new().with_listen("127.0.0.1", 0)).unwrap();
    let listener = bridge.listen().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (samples, queue) = bridge.channel();
    let shutdown = CancellationToken::new();

    let token = shutdown.clone();
    let task = tokio::spawn(async move { bridge.run(listener, queue, token).await });

    Running {
        addr,
        samples,
        shutdown,
        task,
    }
}

/// Poll until `address` reads back `expected`, since ingest is asynchronous.
async fn wait_for_f32(client: &mut ModbusTcpClient, address: u16, expected: f32) {
    for _ in 0..100 {
        if client.read_f32(1, address).await.unwrap() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("register {} never reached {}", address, expected);
}

#[tokio::test]
async fn test_sunspec_marker_and_end_block() {
    let running = start().await;
    let mut client = running.client().await;

    assert_eq!(client.read_03(1, 40000, 2).await.unwrap(), vec![0x5375, 0x6E53]);
    assert_eq!(client.read_03(1, 40002, 2).await.unwrap(), vec![1, 66]);
    assert_eq!(client.read_03(1, 40070, 2).await.unwrap(), vec![113, 60]);
    assert_eq!(client.read_03(1, 40132, 2).await.unwrap(), vec![213, 124]);
    assert_eq!(client.read_03(1, 40258, 2).await.unwrap(), vec![0xFFFF, 0]);

    client.close().await.unwrap();
    running.stop().await;
}

#[tokio::test]
async fn test_power_sample_reads_back() {
    let running = start().await;
    let mut client = running.client().await;

    running.push(Sample::now(TelemetryKey::W, 1500.5)).await;
    wait_for_f32(&mut client, INVERTER_W, 1500.5).await;

    running.push(Sample::now(TelemetryKey::GridW, -230.0)).await;
    wait_for_f32(&mut client, METER_W, -230.0).await;

    running.stop().await;
}

#[tokio::test]
async fn test_frequency_fans_out_to_both_models() {
    let running = start().await;
    let mut client = running.client().await;

    for sample in decode_ehub(br#"{"gridfreq": {"val": "49.98"}}"#, chrono::Utc::now()).unwrap() {
        running.push(sample).await;
    }
    wait_for_f32(&mut client, INVERTER_HZ, 49.98).await;
    assert_eq!(client.read_f32(1, 40158).await.unwrap(), 49.98);

    running.stop().await;
}

#[tokio::test]
async fn test_operating_state_is_constant() {
    let running = start().await;
    let mut client = running.client().await;

    assert_eq!(client.read_03(1, INVERTER_ST, 1).await.unwrap(), vec![4]);

    running.push(Sample::now(TelemetryKey::State, 1.0)).await;
    running.push(Sample::now(TelemetryKey::W, 10.0)).await;
    wait_for_f32(&mut client, INVERTER_W, 10.0).await;
    assert_eq!(client.read_03(1, INVERTER_ST, 1).await.unwrap(), vec![4]);

    running.stop().await;
}

#[tokio::test]
async fn test_unbound_fields_stay_not_implemented() {
    let running = start().await;
    let mut client = running.client().await;

    running.push(Sample::now(TelemetryKey::W, 10.0)).await;
    wait_for_f32(&mut client, INVERTER_W, 10.0).await;

    assert_eq!(client.read_03(1, INVERTER_PF, 2).await.unwrap(), vec![0x7FC0, 0x0000]);
    // StVnd
    assert_eq!(client.read_03(1, INVERTER_ST + 1, 1).await.unwrap(), vec![0xFFFF]);
    // Evt1 is published as "no events"
    assert_eq!(client.read_03(1, INVERTER_ST + 2, 2).await.unwrap(), vec![0, 0]);
    // Evt2
    assert_eq!(client.read_03(1, INVERTER_ST + 4, 2).await.unwrap(), vec![0xFFFF, 0xFFFF]);

    running.stop().await;
}

#[tokio::test]
async fn test_exception_responses() {
    let running = start().await;
    let mut client = running.client().await;

    // Outside the map on either side
    for (start, count) in [(39999, 1), (40259, 2), (0, 10)] {
        let err = client.read_03(1, start, count).await.unwrap_err();
        assert!(
            matches!(err, SunspecError::Exception { function: 0x83, code: 0x02 }),
            "{} x{}: {:?}",
            start,
            count,
            err
        );
    }

    // Unsupported function code
    let fc04 = PduBuilder::new()
        .function_code(0x04)
        .unwrap()
        .address(40000)
        .unwrap()
        .quantity(1)
        .unwrap()
        .build();
    let reply = client.request(1, &fc04).await.unwrap();
    assert_eq!(reply.as_slice(), &[0x83, 0x01]);

    // Register count zero and above 125
    for count in [0u16, 126] {
        let bad = PduBuilder::new()
            .function_code(0x03)
            .unwrap()
            .address(40000)
            .unwrap()
            .quantity(count)
            .unwrap()
            .build();
        let reply = client.request(1, &bad).await.unwrap();
        assert_eq!(reply.as_slice(), &[0x83, 0x03]);
    }

    // The connection survives every exception
    assert_eq!(client.read_03(1, 40000, 2).await.unwrap(), vec![0x5375, 0x6E53]);
    running.stop().await;
}

#[tokio::test]
async fn test_unit_id_is_echoed() {
    let running = start().await;
    let mut client = running.client().await;

    for unit in [0u8, 1, 126, 255] {
        assert_eq!(client.read_03(unit, 40000, 2).await.unwrap(), vec![0x5375, 0x6E53]);
    }
    running.stop().await;
}

#[tokio::test]
async fn test_framing_error_closes_without_reply() {
    let running = start().await;
    let mut stream = TcpStream::connect(running.addr).await.unwrap();

    // Protocol id 1
    stream
        .write_all(&[0, 1, 0, 1, 0, 6, 1, 0x03, 0x9C, 0x40, 0x00, 0x02])
        .await
        .unwrap();

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(TIMEOUT, stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(read, 0);

    // Other connections are unaffected
    let mut client = running.client().await;
    assert_eq!(client.read_03(1, 40000, 2).await.unwrap(), vec![0x5375, 0x6E53]);
    running.stop().await;
}

#[tokio::test]
async fn test_pipelined_requests_answered_in_order() {
    let running = start().await;
    let mut stream = TcpStream::connect(running.addr).await.unwrap();

    let mut frames = Vec::new();
    for (tid, addr) in [(7u16, 40000u16), (8, 40258)] {
        frames.extend_from_slice(&tid.to_be_bytes());
        frames.extend_from_slice(&[0, 0, 0, 6, 1, 0x03]);
        frames.extend_from_slice(&addr.to_be_bytes());
        frames.extend_from_slice(&[0, 2]);
    }
    stream.write_all(&frames).await.unwrap();

    let mut replies = [0u8; 26];
    stream.read_exact(&mut replies).await.unwrap();
    assert_eq!(&replies[..13], &[0, 7, 0, 0, 0, 7, 1, 0x03, 4, 0x53, 0x75, 0x6E, 0x53]);
    assert_eq!(&replies[13..], &[0, 8, 0, 0, 0, 7, 1, 0x03, 4, 0xFF, 0xFF, 0, 0]);

    running.stop().await;
}

#[tokio::test]
async fn test_concurrent_clients() {
    let running = start().await;
    running.push(Sample::now(TelemetryKey::W, 321.0)).await;
    let mut first = running.client().await;
    wait_for_f32(&mut first, INVERTER_W, 321.0).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let addr = running.addr;
        tasks.push(tokio::spawn(async move {
            let mut client = ModbusTcpClient::new(addr, TIMEOUT).await.unwrap();
            for _ in 0..20 {
                let regs = client.read_03(1, 40000, 125).await.unwrap();
                assert_eq!(&regs[..2], &[0x5375, 0x6E53]);
                assert_eq!(client.read_f32(1, INVERTER_W).await.unwrap(), 321.0);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    running.stop().await;
}

#[tokio::test]
async fn test_shutdown_applies_queued_samples() {
    let bridge = Bridge::new(BridgeConfig::new().with_listen("127.0.0.1", 0)).unwrap();
    let listener = bridge.listen().await.unwrap();
    let (samples, queue) = bridge.channel();

    for watts in [1.0, 2.0, 3.0] {
        samples.send(Sample::now(TelemetryKey::W, watts)).await.unwrap();
    }

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    bridge.run(listener, queue, shutdown).await.unwrap();

    let map = bridge.register_map();
    let slot = map.locate(113, "W").unwrap();
    assert_eq!(map.field_value(&slot).unwrap().as_f64(), Some(3.0));
    assert_eq!(bridge.binder().stats().samples_received, 3);
    assert!(samples.is_closed());
}

#[tokio::test]
async fn test_shutdown_closes_idle_connections() {
    let running = start().await;
    let mut stream = TcpStream::connect(running.addr).await.unwrap();
    // Make sure the connection has been accepted
    let mut client = running.client().await;
    client.read_03(1, 40000, 1).await.unwrap();

    running.stop().await;

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(TIMEOUT, stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(read, 0);
}
