//! End-to-end sessions against the simulated instrument
//!
//! These go through the full stack: simulated link, channel, source-meter
//! proxy, and safety controller, and check the command stream the
//! instrument actually receives.

use keithley_core::{Keithley2470, OutputState, Polarity, RampParameters, SmuError};
use keithley_hardware::{
    Channel, SafetyController, SimulatedInstrument, SimulatorHandle, SocketDriver, SourceMeter,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

async fn session() -> (SafetyController, SimulatorHandle) {
    let sim = SimulatedInstrument::new();
    let handle = sim.handle();
    let meter = SourceMeter::<Keithley2470>::connect(Box::new(sim))
        .await
        .expect("simulated instrument should connect");
    let controller = SafetyController::new(meter, Polarity::Negative, RampParameters::default());
    (controller, handle)
}

/// Voltages programmed by `:SOURCE:VOLT:LEV`, in order
fn programmed_voltages(handle: &SimulatorHandle) -> Vec<f64> {
    handle
        .writes()
        .iter()
        .filter_map(|w| w.strip_prefix(":SOURCE:VOLT:LEV "))
        .map(|v| v.parse().expect("numeric setpoint"))
        .collect()
}

#[tokio::test]
async fn connect_sends_initialization_sequence() {
    let sim = SimulatedInstrument::new();
    let handle = sim.handle();

    SourceMeter::<Keithley2470>::connect(Box::new(sim))
        .await
        .unwrap();

    assert_eq!(
        handle.commands(),
        vec!["*IDN?", ":MEASURE:VOLT?", ":SOURCE:VOLT:LEV 0", ":OUTPUT OFF"]
    );
}

#[tokio::test]
async fn wrong_instrument_gets_no_commands_after_identity() {
    let sim = SimulatedInstrument::with_identity("Rohde&Schwarz,HMP4040,123456,HW50020001/SW2.51");
    let handle = sim.handle();

    let result = SourceMeter::<Keithley2470>::connect(Box::new(sim)).await;

    match result {
        Err(SmuError::IdentityMismatch { expected, reported }) => {
            assert_eq!(expected, "KEITHLEY MODEL 2470");
            assert!(reported.starts_with("Rohde&Schwarz"));
        }
        Err(other) => panic!("expected identity mismatch, got {}", other),
        Ok(_) => panic!("expected identity mismatch, got a connected meter"),
    }
    assert_eq!(handle.commands(), vec!["*IDN?"]);
}

#[tokio::test(start_paused = true)]
async fn full_session_never_jumps_while_on() {
    let (controller, handle) = session().await;

    controller.set_source_voltage(12.0).await.unwrap();
    controller.set_output(OutputState::On).await.unwrap();
    controller.set_source_voltage(30.0).await.unwrap();
    controller.set_source_voltage(4.0).await.unwrap();
    controller.shutdown().await.unwrap();

    assert_eq!(handle.output(), OutputState::Off);
    assert_eq!(handle.source_voltage(), 0.0);

    // Replay the command stream and check every setpoint change made with the output on
    let mut output = OutputState::Off;
    let mut voltage = 0.0_f64;
    for command in handle.writes() {
        if let Some(arg) = command.strip_prefix(":SOURCE:VOLT:LEV ") {
            let next: f64 = arg.parse().unwrap();
            assert!(next <= 0.0, "positive setpoint {} under negative polarity", next);
            if output == OutputState::On {
                assert!(
                    (next - voltage).abs() <= 2.5 + 1e-9,
                    "jump from {} to {} with output on",
                    voltage,
                    next
                );
            }
            voltage = next;
        } else if command == ":OUTPUT ON" {
            assert_eq!(voltage, 0.0, "output switched on away from 0 V");
            output = OutputState::On;
        } else if command == ":OUTPUT OFF" {
            assert_eq!(voltage, 0.0, "output switched off away from 0 V");
            output = OutputState::Off;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn output_cycle_restores_voltage() {
    let (controller, handle) = session().await;

    controller.set_source_voltage(20.0).await.unwrap();
    controller.set_output(OutputState::On).await.unwrap();
    assert_eq!(handle.source_voltage(), -20.0);

    controller.set_output(OutputState::Off).await.unwrap();
    assert_eq!(handle.source_voltage(), 0.0);

    controller.set_source_voltage(20.0).await.unwrap();
    controller.set_output(OutputState::On).await.unwrap();
    assert_eq!(handle.source_voltage(), -20.0);
    assert_eq!(handle.output(), OutputState::On);
}

#[tokio::test(start_paused = true)]
async fn repeated_output_request_is_silent() {
    let (controller, handle) = session().await;
    handle.clear_commands();

    controller.set_output(OutputState::Off).await.unwrap();
    controller.set_output(OutputState::Off).await.unwrap();

    assert!(handle.writes().is_empty());
    assert_eq!(handle.commands(), vec![":OUTPUT:STATE?", ":OUTPUT:STATE?"]);
}

#[tokio::test(start_paused = true)]
async fn link_failure_mid_ramp_leaves_last_setpoint() {
    let (controller, handle) = session().await;
    controller.set_output(OutputState::On).await.unwrap();
    handle.clear_commands();

    // Output state query, then one query and one write per step
    handle.fail_after(5);
    let result = controller.set_source_voltage(100.0).await;

    assert!(matches!(result, Err(SmuError::Link(_))));
    assert_eq!(programmed_voltages(&handle), vec![-2.5, -5.0]);
    assert_eq!(handle.source_voltage(), -5.0);
}

#[tokio::test(start_paused = true)]
async fn source_limit_stalls_ramp() {
    let (controller, handle) = session().await;
    controller.set_output(OutputState::On).await.unwrap();
    handle.set_voltage_clamp(Some(21.0));

    let result = controller.set_source_voltage(1000.0).await;

    assert!(matches!(
        result,
        Err(SmuError::RampStalled { target, last }) if target == -1000.0 && last == -21.0
    ));
}

#[tokio::test(start_paused = true)]
async fn guarded_session_shuts_down_on_error() {
    let (controller, handle) = session().await;

    let result: keithley_core::Result<()> = controller
        .run_guarded(|c| {
            Box::pin(async move {
                c.set_output(OutputState::On).await?;
                c.set_source_voltage(15.0).await?;
                c.proxy().beep(50.0, 0.5).await
            })
        })
        .await;

    assert!(matches!(result, Err(SmuError::InvalidArgument(_))));
    assert_eq!(handle.output(), OutputState::Off);
    assert_eq!(handle.source_voltage(), 0.0);
    assert!(handle.beeps().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_queries_share_one_link_safely() {
    let sim = SimulatedInstrument::new();
    let handle = sim.handle();
    let meter = Arc::new(
        SourceMeter::<Keithley2470>::with_channel(Channel::new(Box::new(sim)))
            .await
            .unwrap(),
    );
    handle.clear_commands();

    let mut tasks = Vec::new();
    for i in 0..1000 {
        let meter = meter.clone();
        tasks.push(tokio::spawn(async move {
            match i % 4 {
                0 => {
                    meter.output().await.unwrap();
                }
                1 => {
                    meter.source_voltage().await.unwrap();
                }
                2 => {
                    meter.measure_current().await.unwrap();
                }
                _ => {
                    let idn = channel_query(&meter).await;
                    assert!(idn.contains("MODEL 2470"));
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(handle.interleavings(), 0);
    assert_eq!(handle.commands().len(), 1000);
}

async fn channel_query(meter: &SourceMeter) -> String {
    meter.channel().query("*IDN?").await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn polling_continues_during_ramp() {
    let (controller, handle) = session().await;
    let controller = Arc::new(controller);
    controller.set_output(OutputState::On).await.unwrap();

    let ramp = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.set_source_voltage(50.0).await })
    };

    let mut samples = Vec::new();
    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(300)).await;
        samples.push(controller.proxy().measure_voltage().await.unwrap());
    }
    ramp.await.unwrap().unwrap();

    // Readings moved with the ramp instead of waiting for it
    assert!(samples.windows(2).all(|w| w[1] <= w[0]));
    assert!(samples[0] > -50.0 && samples[7] < samples[0]);
    assert_eq!(handle.source_voltage(), -50.0);
    assert_eq!(handle.interleavings(), 0);
}

/// Minimal 2470 on a local socket; the first current reading is answered
/// after `delay`. Returns the port and the log of received lines.
async fn spawn_bench_instrument(delay: Duration) -> (u16, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let log = Arc::new(Mutex::new(Vec::new()));

    let received = log.clone();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = socket.into_split();
        let mut lines = BufReader::new(reader).lines();
        let mut voltage = 0.0_f64;
        let mut output_on = false;
        let mut slow = true;

        while let Ok(Some(line)) = lines.next_line().await {
            received.lock().unwrap().push(line.clone());
            let answer = match line.as_str() {
                "*IDN?" => "KEITHLEY INSTRUMENTS,MODEL 2470,04400001,1.7.5b".to_string(),
                ":MEASURE:VOLT?" | ":SOUR:VOLT?" => format!("{:.6E}", voltage),
                ":OUTPUT:STATE?" => (if output_on { "1" } else { "0" }).to_string(),
                ":MEASURE:CURRENT?" => {
                    if slow {
                        slow = false;
                        tokio::time::sleep(delay).await;
                    }
                    "1.2E-06".to_string()
                }
                ":OUTPUT ON" => {
                    output_on = true;
                    continue;
                }
                ":OUTPUT OFF" => {
                    output_on = false;
                    continue;
                }
                other => {
                    if let Some(level) = other.strip_prefix(":SOURCE:VOLT:LEV ") {
                        voltage = level.parse().unwrap();
                    }
                    continue;
                }
            };
            writer
                .write_all(format!("{}\n", answer).as_bytes())
                .await
                .unwrap();
        }
    });

    (port, log)
}

#[tokio::test]
async fn late_reading_does_not_shortcut_shutdown_ramp() {
    let (port, log) = spawn_bench_instrument(Duration::from_millis(300)).await;
    let driver = SocketDriver::connect("127.0.0.1", port, 100).await.unwrap();
    let meter = SourceMeter::<Keithley2470>::connect(Box::new(driver))
        .await
        .unwrap();
    let ramp = RampParameters::new(1000.0, 2.5).unwrap();
    let controller = SafetyController::new(meter, Polarity::Negative, ramp);

    controller.set_output(OutputState::On).await.unwrap();
    controller.set_source_voltage(10.0).await.unwrap();

    // The reading times out; its answer arrives while the next command is pending
    let reading = controller.proxy().measure_current().await;
    assert!(matches!(reading, Err(SmuError::Timeout(_))));

    controller.shutdown().await.unwrap();

    let received = log.lock().unwrap().clone();
    let setpoints: Vec<f64> = received
        .iter()
        .skip_while(|line| *line != ":MEASURE:CURRENT?")
        .filter_map(|line| line.strip_prefix(":SOURCE:VOLT:LEV "))
        .map(|level| level.parse().unwrap())
        .collect();
    // Stepped down from the real -10 V, not from the stale reading
    assert_eq!(&setpoints[..4], &[-7.5, -5.0, -2.5, 0.0]);
    assert!(setpoints[4..].iter().all(|level| *level == 0.0));
    assert_eq!(received.last().map(String::as_str), Some(":OUTPUT OFF"));
}
