//! # B-route Session State Machine
//!
//! [`BrouteReader`] owns a [`WiSunDevice`] and drives it through the session
//! lifecycle:
//!
//! ```text
//! Init --open--> Open --reset/setup--> Setup --scan--> Scan --join--> Join
//! ```
//!
//! In the joined state it polls the meter on the configured cycles and
//! interprets the responses into [`MeterRecord`]s pushed onto a bounded
//! channel. Every failure rolls the state back far enough to recover: open
//! and setup failures pause and retry in place, scan and join failures retry
//! a few times before tearing the session down to `Init`, and a receive
//! watchdog restarts a session that has gone silent.

use crate::constants::{
    MAX_STATE_RETRIES, RECEIVE_WATCHDOG_SECS, RETRY_PAUSE_LONG_SECS, RETRY_PAUSE_SHORT_SECS,
};
use crate::echonet::frame::{EchonetFrame, DEOJ_SMART_METER, ESV_NOTIFICATION, ESV_READ_RESPONSE};
use crate::echonet::properties::{
    decode_timestamp, unit_multiplier, EPC_COEFFICIENT, EPC_CUMULATIVE_FWD, EPC_CUMULATIVE_FWD_AT,
    EPC_CUMULATIVE_REV, EPC_CUMULATIVE_REV_AT, EPC_CUMULATIVE_UNIT, EPC_EFFECTIVE_DIGITS,
    EPC_INSTANT_CURRENT, EPC_INSTANT_POWER,
};
use crate::util::hex::{hex_to_signed, hex_to_unsigned};
use crate::wisun::WiSunDevice;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Session lifecycle states. Each state names what has been achieved, not
/// what runs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrouteState {
    /// Nothing acquired yet.
    Init,
    /// Serial port open.
    Open,
    /// Device reset and credentials registered.
    Setup,
    /// Meter located and device configured to reach it.
    Scan,
    /// PANA session established; polling.
    Join,
}

/// One group of properties polled together on a fixed cycle.
#[derive(Debug, Clone)]
pub struct PollRequest {
    epcs: Vec<String>,
    cycle_secs: u64,
    /// Nominal time of the last request. `None` until the first send.
    last_sent: Option<u64>,
}

impl PollRequest {
    pub fn new<S: AsRef<str>>(epcs: &[S], cycle_secs: u64) -> Self {
        PollRequest {
            epcs: epcs.iter().map(|e| e.as_ref().to_string()).collect(),
            cycle_secs,
            last_sent: None,
        }
    }

    fn due(&self, now: u64) -> bool {
        match self.last_sent {
            None => true,
            Some(t) => now.saturating_sub(t) > self.cycle_secs,
        }
    }

    /// First send stamps the wall clock; later sends advance by exactly one
    /// cycle so slow iterations do not accumulate drift.
    fn mark_sent(&mut self, now: u64) {
        self.last_sent = Some(match self.last_sent {
            None => now,
            Some(t) => t + self.cycle_secs,
        });
    }
}

/// The default poll set: calibration properties hourly, instantaneous power
/// every 10 seconds, cumulative energy every 2 minutes.
pub fn default_poll_requests() -> Vec<PollRequest> {
    vec![
        PollRequest::new(
            &[EPC_COEFFICIENT, EPC_EFFECTIVE_DIGITS, EPC_CUMULATIVE_UNIT],
            3600,
        ),
        PollRequest::new(&[EPC_INSTANT_POWER], 10),
        PollRequest::new(&[EPC_CUMULATIVE_FWD], 120),
    ]
}

/// One decoded reading, as pushed to the record channel.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterRecord {
    /// Record source tag, always `"BR"` for B-route readings.
    pub source: String,
    /// Property code the value came from. `E8` additionally yields `E8R` and
    /// `E8T` for the per-phase currents.
    pub epc: String,
    pub value: f64,
    /// Record kind tag, always `"X"`.
    pub kind: String,
}

impl MeterRecord {
    fn new(epc: &str, value: f64) -> Self {
        MeterRecord {
            source: "BR".to_string(),
            epc: epc.to_string(),
            value,
            kind: "X".to_string(),
        }
    }
}

/// Scaling parameters for cumulative energy values, learned from the meter's
/// D3/D7/E1 properties. Fresh sessions start from the defaults until the
/// calibration poll comes back.
#[derive(Debug, Clone, Copy)]
struct Calibration {
    coefficient: f64,
    unit: f64,
    effective_digits: u64,
}

impl Default for Calibration {
    fn default() -> Self {
        Calibration {
            coefficient: 1.0,
            unit: 0.1,
            effective_digits: 6,
        }
    }
}

/// Long-running reader session over one Wi-SUN device.
pub struct BrouteReader<D: WiSunDevice> {
    device: D,
    broute_id: String,
    broute_pwd: String,
    requests: Vec<PollRequest>,
    records: mpsc::Sender<MeterRecord>,
    stop: Arc<AtomicBool>,

    state: BrouteState,
    scan_retry: u32,
    join_retry: u32,
    calibration: Calibration,
    tid: u16,
    last_receive: u64,
}

impl<D: WiSunDevice> BrouteReader<D> {
    /// An empty `requests` list selects [`default_poll_requests`].
    pub fn new(
        device: D,
        broute_id: &str,
        broute_pwd: &str,
        requests: Vec<PollRequest>,
        records: mpsc::Sender<MeterRecord>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let requests = if requests.is_empty() {
            default_poll_requests()
        } else {
            requests
        };
        BrouteReader {
            device,
            broute_id: broute_id.to_string(),
            broute_pwd: broute_pwd.to_string(),
            requests,
            records,
            stop,
            state: BrouteState::Init,
            scan_retry: 0,
            join_retry: 0,
            calibration: Calibration::default(),
            tid: 0,
            last_receive: 0,
        }
    }

    /// Runs the session until the stop flag is raised, then terminates the
    /// PANA session and releases the device.
    pub async fn run(mut self) {
        info!("[START]");
        while !self.stop.load(Ordering::SeqCst) {
            let pause = self.step(unix_now()).await;
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
        if self.device.terminate().await.is_err() {
            warn!("session terminate failed on shutdown");
        }
        self.device.close().await;
        info!("[STOP]");
    }

    /// Executes one state-machine iteration at time `now` (seconds). Returns
    /// how long the caller should pause before the next iteration.
    async fn step(&mut self, now: u64) -> Duration {
        match self.state {
            BrouteState::Init => self.step_init().await,
            BrouteState::Open => self.step_open().await,
            BrouteState::Setup => self.step_setup().await,
            BrouteState::Scan => self.step_scan(now).await,
            BrouteState::Join => self.step_join(now).await,
        }
    }

    async fn step_init(&mut self) -> Duration {
        info!("state = INIT");
        match self.device.open().await {
            Ok(()) => {
                self.state = BrouteState::Open;
                info!("state => OPEN");
                Duration::ZERO
            }
            Err(e) => {
                error!("cannot open device: {e}");
                Duration::from_secs(RETRY_PAUSE_SHORT_SECS)
            }
        }
    }

    async fn step_open(&mut self) -> Duration {
        if let Err(e) = self.device.reset().await {
            error!("cannot reset device: {e}");
            return Duration::from_secs(RETRY_PAUSE_SHORT_SECS);
        }
        match self.device.setup(&self.broute_id, &self.broute_pwd).await {
            Ok(()) => {
                self.state = BrouteState::Setup;
                info!("state => SETUP");
                if let Err(e) = self.device.dump_registers().await {
                    warn!("register dump failed: {e}");
                }
                Duration::ZERO
            }
            Err(e) => {
                error!("cannot setup device: {e}");
                Duration::from_secs(RETRY_PAUSE_SHORT_SECS)
            }
        }
    }

    async fn step_setup(&mut self) -> Duration {
        match self.device.scan().await {
            Ok(()) => {
                self.state = BrouteState::Scan;
                info!("state => SCAN");
                self.scan_retry = 0;
                Duration::ZERO
            }
            Err(e) => {
                error!("scan failed ({e}), retry times = {}", self.scan_retry);
                self.scan_retry += 1;
                if self.scan_retry > MAX_STATE_RETRIES {
                    // The cached scan result may be the reason nothing is
                    // answering; the next attempt starts from a clean slate.
                    self.scan_retry = 0;
                    self.device.close().await;
                    self.device.clear_scan_cache();
                    self.restart_session();
                }
                Duration::from_secs(RETRY_PAUSE_LONG_SECS)
            }
        }
    }

    async fn step_scan(&mut self, now: u64) -> Duration {
        match self.device.join(false).await {
            Ok(()) => {
                self.state = BrouteState::Join;
                info!("state => JOIN");
                self.scan_retry = 0;
                self.join_retry = 0;
                self.last_receive = now;
                Duration::ZERO
            }
            Err(e) => {
                error!("join failed ({e}), retry times = {}", self.join_retry);
                self.join_retry += 1;
                if self.join_retry > MAX_STATE_RETRIES {
                    self.join_retry = 0;
                    self.device.close().await;
                    self.restart_session();
                }
                Duration::from_secs(RETRY_PAUSE_LONG_SECS)
            }
        }
    }

    async fn step_join(&mut self, now: u64) -> Duration {
        for i in 0..self.requests.len() {
            if !self.requests[i].due(now) {
                continue;
            }
            let tid = self.next_tid();
            let frame = EchonetFrame::read_request(&self.requests[i].epcs, tid);
            if let Err(e) = self.device.send(&frame).await {
                warn!("property request failed: {e}");
            }
            self.requests[i].mark_sent(now);
        }

        // One bounded receive per iteration; silence is not an error.
        if let Some(frame) = self.device.receive().await {
            self.last_receive = now;
            self.accept(&frame).await;
        }

        if now.saturating_sub(self.last_receive) > RECEIVE_WATCHDOG_SECS {
            error!("receive watchdog expired, restarting session");
            if self.device.terminate().await.is_err() {
                warn!("session terminate failed");
            }
            self.device.close().await;
            self.restart_session();
            return Duration::from_secs(RETRY_PAUSE_SHORT_SECS);
        }
        Duration::ZERO
    }

    /// Tears the session state back to `Init`. Learned calibration and poll
    /// schedules belong to the dead session, so both start over.
    fn restart_session(&mut self) {
        self.state = BrouteState::Init;
        self.calibration = Calibration::default();
        for req in &mut self.requests {
            req.last_sent = None;
        }
    }

    fn next_tid(&mut self) -> u16 {
        self.tid = (self.tid + 1) % 0xFFFF;
        self.tid
    }

    /// Interprets one inbound frame, pushing decoded values to the record
    /// channel. Anything that is not a smart-meter read response or
    /// notification is logged and dropped.
    async fn accept(&mut self, frame: &EchonetFrame) {
        if frame.seoj != DEOJ_SMART_METER
            || (frame.esv != ESV_READ_RESPONSE && frame.esv != ESV_NOTIFICATION)
        {
            warn!("unknown SEOJ or ESV: {},{}", frame.seoj, frame.esv);
            return;
        }

        for (epc, edt) in frame.properties() {
            match epc.as_str() {
                EPC_INSTANT_POWER => match hex_to_signed(edt, None) {
                    Ok(watts) => self.emit(epc, watts as f64).await,
                    Err(e) => warn!("bad E7 value {edt}: {e}"),
                },
                EPC_INSTANT_CURRENT => {
                    if edt.len() < 8 {
                        warn!("short E8 value: {edt}");
                        continue;
                    }
                    // Two signed 2-byte halves in units of 0.1 A.
                    let halves = (hex_to_signed(&edt[..4], None), hex_to_signed(&edt[4..8], None));
                    match halves {
                        (Ok(r), Ok(t)) => {
                            let rvalue = r as f64 * 0.1;
                            let tvalue = t as f64 * 0.1;
                            self.emit("E8R", rvalue).await;
                            self.emit("E8T", tvalue).await;
                            self.emit("E8", rvalue + tvalue).await;
                        }
                        _ => warn!("bad E8 value: {edt}"),
                    }
                }
                EPC_CUMULATIVE_FWD | EPC_CUMULATIVE_REV => match hex_to_unsigned(edt) {
                    Ok(raw) => {
                        let value = self.scale_cumulative(raw);
                        self.emit(epc, value).await;
                    }
                    Err(e) => warn!("bad {epc} value {edt}: {e}"),
                },
                EPC_COEFFICIENT => match hex_to_unsigned(edt) {
                    Ok(value) => {
                        self.calibration.coefficient = value as f64;
                        debug!("coefficient = {value}");
                        self.emit(epc, value as f64).await;
                    }
                    Err(e) => warn!("bad D3 value {edt}: {e}"),
                },
                EPC_EFFECTIVE_DIGITS => match hex_to_unsigned(edt) {
                    Ok(value) => {
                        self.calibration.effective_digits = value;
                        debug!("effective_digits = {value}");
                        self.emit(epc, value as f64).await;
                    }
                    Err(e) => warn!("bad D7 value {edt}: {e}"),
                },
                EPC_CUMULATIVE_UNIT => match hex_to_unsigned(edt) {
                    Ok(code) => {
                        // The record carries the raw unit code; the learned
                        // multiplier only affects later E0/E3 scaling.
                        self.calibration.unit = match unit_multiplier(code) {
                            Some(unit) => unit,
                            None => {
                                warn!("unknown unit code {code:#04X}, assuming 0.1");
                                0.1
                            }
                        };
                        debug!("unit = {}", self.calibration.unit);
                        self.emit(epc, code as f64).await;
                    }
                    Err(e) => warn!("bad E1 value {edt}: {e}"),
                },
                EPC_CUMULATIVE_FWD_AT | EPC_CUMULATIVE_REV_AT => {
                    if edt.len() < 15 {
                        warn!("short {epc} value: {edt}");
                        continue;
                    }
                    match (decode_timestamp(&edt[..14]), hex_to_unsigned(&edt[14..])) {
                        (Ok(stamp), Ok(raw)) => {
                            let value = self.scale_cumulative(raw);
                            info!("{stamp} {epc} = {value}");
                            self.emit(epc, value).await;
                        }
                        _ => warn!("bad {epc} value: {edt}"),
                    }
                }
                _ => warn!("unknown property: {epc} value: {edt}"),
            }
        }
    }

    fn scale_cumulative(&self, raw: u64) -> f64 {
        raw as f64 * self.calibration.coefficient * self.calibration.unit
    }

    async fn emit(&self, epc: &str, value: f64) {
        if self.records.send(MeterRecord::new(epc, value)).await.is_err() {
            warn!("record channel closed, reading dropped");
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BRouteError;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Scripted device: fails the next N scan or join calls, records every
    /// sent frame, and replays queued inbound frames.
    #[derive(Default)]
    struct FakeDevice {
        fail_scans: u32,
        fail_joins: u32,
        scan_calls: u32,
        join_calls: u32,
        close_calls: u32,
        terminate_calls: u32,
        cache_cleared: bool,
        sent: Vec<EchonetFrame>,
        inbound: VecDeque<EchonetFrame>,
    }

    #[async_trait]
    impl WiSunDevice for FakeDevice {
        async fn open(&mut self) -> Result<(), BRouteError> {
            Ok(())
        }

        async fn reset(&mut self) -> Result<(), BRouteError> {
            Ok(())
        }

        async fn setup(&mut self, _id: &str, _password: &str) -> Result<(), BRouteError> {
            Ok(())
        }

        async fn dump_registers(&mut self) -> Result<(), BRouteError> {
            Ok(())
        }

        async fn scan(&mut self) -> Result<(), BRouteError> {
            self.scan_calls += 1;
            if self.fail_scans > 0 {
                self.fail_scans -= 1;
                return Err(BRouteError::ScanFailed);
            }
            Ok(())
        }

        async fn join(&mut self, _rejoin: bool) -> Result<(), BRouteError> {
            self.join_calls += 1;
            if self.fail_joins > 0 {
                self.fail_joins -= 1;
                return Err(BRouteError::JoinFailed);
            }
            Ok(())
        }

        async fn send(&mut self, frame: &EchonetFrame) -> Result<(), BRouteError> {
            self.sent.push(frame.clone());
            Ok(())
        }

        async fn receive(&mut self) -> Option<EchonetFrame> {
            self.inbound.pop_front()
        }

        async fn terminate(&mut self) -> Result<(), BRouteError> {
            self.terminate_calls += 1;
            Ok(())
        }

        fn clear_scan_cache(&mut self) {
            self.cache_cleared = true;
        }

        async fn close(&mut self) {
            self.close_calls += 1;
        }
    }

    fn reader(
        device: FakeDevice,
        requests: Vec<PollRequest>,
    ) -> (BrouteReader<FakeDevice>, mpsc::Receiver<MeterRecord>) {
        let (tx, rx) = mpsc::channel(64);
        let stop = Arc::new(AtomicBool::new(false));
        let reader = BrouteReader::new(
            device,
            "0123456789ABCDEF0123456789ABCDEF",
            "SECRET12",
            requests,
            tx,
            stop,
        );
        (reader, rx)
    }

    /// Builds a meter read-response frame from EPC/EDT pairs.
    fn response(props: &[(&str, &str)]) -> EchonetFrame {
        frame_with("028801", "72", props)
    }

    fn frame_with(seoj: &str, esv: &str, props: &[(&str, &str)]) -> EchonetFrame {
        let mut hex = format!("10810001{seoj}05FF01{esv}{:02X}", props.len());
        for (epc, edt) in props {
            hex.push_str(epc);
            hex.push_str(&format!("{:02X}", edt.len() / 2));
            hex.push_str(edt);
        }
        let len = format!("{:04X}", hex.len() / 2);
        EchonetFrame::decode(&len, &hex).unwrap()
    }

    fn drain(rx: &mut mpsc::Receiver<MeterRecord>) -> Vec<MeterRecord> {
        let mut records = Vec::new();
        while let Ok(record) = rx.try_recv() {
            records.push(record);
        }
        records
    }

    #[tokio::test]
    async fn test_happy_path_reaches_join() {
        let (mut reader, _rx) = reader(FakeDevice::default(), Vec::new());
        assert_eq!(reader.step(100).await, Duration::ZERO); // Init -> Open
        assert_eq!(reader.step(100).await, Duration::ZERO); // Open -> Setup
        assert_eq!(reader.step(100).await, Duration::ZERO); // Setup -> Scan
        assert_eq!(reader.step(100).await, Duration::ZERO); // Scan -> Join
        assert_eq!(reader.state, BrouteState::Join);
        assert_eq!(reader.last_receive, 100);
    }

    #[tokio::test]
    async fn test_scan_exhaustion_resets_and_clears_cache() {
        let device = FakeDevice {
            fail_scans: 6,
            ..FakeDevice::default()
        };
        let (mut reader, _rx) = reader(device, Vec::new());
        reader.state = BrouteState::Setup;

        for _ in 0..5 {
            let pause = reader.step(100).await;
            assert_eq!(pause, Duration::from_secs(RETRY_PAUSE_LONG_SECS));
            assert_eq!(reader.state, BrouteState::Setup);
        }
        // The sixth failure exhausts the budget.
        reader.step(100).await;
        assert_eq!(reader.state, BrouteState::Init);
        assert_eq!(reader.scan_retry, 0);
        assert!(reader.device.cache_cleared);
        assert_eq!(reader.device.close_calls, 1);
    }

    #[tokio::test]
    async fn test_join_exhaustion_resets_without_clearing_cache() {
        let device = FakeDevice {
            fail_joins: 6,
            ..FakeDevice::default()
        };
        let (mut reader, _rx) = reader(device, Vec::new());
        reader.state = BrouteState::Scan;

        for _ in 0..6 {
            reader.step(100).await;
        }
        assert_eq!(reader.state, BrouteState::Init);
        assert_eq!(reader.join_retry, 0);
        assert!(!reader.device.cache_cleared);
        assert_eq!(reader.device.close_calls, 1);
    }

    #[tokio::test]
    async fn test_successful_join_resets_both_retry_counters() {
        let (mut reader, _rx) = reader(FakeDevice::default(), Vec::new());
        reader.state = BrouteState::Scan;
        reader.scan_retry = 3;
        reader.join_retry = 4;

        reader.step(500).await;
        assert_eq!(reader.state, BrouteState::Join);
        assert_eq!(reader.scan_retry, 0);
        assert_eq!(reader.join_retry, 0);
        assert_eq!(reader.last_receive, 500);
    }

    #[tokio::test]
    async fn test_poll_scheduling_is_drift_free() {
        let requests = vec![PollRequest::new(&["E7"], 10)];
        let (mut reader, _rx) = reader(FakeDevice::default(), requests);
        reader.state = BrouteState::Join;
        reader.last_receive = 1000;

        // First iteration sends immediately and stamps the wall clock.
        reader.step(1000).await;
        assert_eq!(reader.requests[0].last_sent, Some(1000));
        assert_eq!(reader.device.sent.len(), 1);

        // Not due yet: now - last_sent must exceed the cycle.
        reader.step(1010).await;
        assert_eq!(reader.device.sent.len(), 1);

        // Late iterations advance the stamp by exactly one cycle each, so
        // after N sends the nominal schedule is still 10*N.
        reader.step(1013).await;
        assert_eq!(reader.requests[0].last_sent, Some(1010));
        reader.step(1024).await;
        assert_eq!(reader.requests[0].last_sent, Some(1020));
        assert_eq!(reader.device.sent.len(), 3);
    }

    #[tokio::test]
    async fn test_poll_requests_get_distinct_tids() {
        let requests = vec![
            PollRequest::new(&["E7"], 10),
            PollRequest::new(&["E0"], 120),
        ];
        let (mut reader, _rx) = reader(FakeDevice::default(), requests);
        reader.state = BrouteState::Join;
        reader.last_receive = 1000;

        reader.step(1000).await;
        assert_eq!(reader.device.sent.len(), 2);
        assert_ne!(reader.device.sent[0].tid, reader.device.sent[1].tid);
    }

    #[tokio::test]
    async fn test_watchdog_fires_once_per_stall() {
        let (mut reader, _rx) = reader(FakeDevice::default(), Vec::new());
        reader.state = BrouteState::Join;
        reader.last_receive = 1000;
        // Stamp the schedule so the iteration is a pure receive poll.
        for req in &mut reader.requests {
            req.last_sent = Some(1000);
        }

        // Within the window: nothing happens.
        reader.step(1600).await;
        assert_eq!(reader.state, BrouteState::Join);
        assert_eq!(reader.device.terminate_calls, 0);

        // Past the window: terminate, close, back to Init, short pause.
        let pause = reader.step(1601).await;
        assert_eq!(pause, Duration::from_secs(RETRY_PAUSE_SHORT_SECS));
        assert_eq!(reader.state, BrouteState::Init);
        assert_eq!(reader.device.terminate_calls, 1);
        assert_eq!(reader.device.close_calls, 1);

        // The stalled session is gone; the next iteration reopens instead of
        // tearing down again.
        reader.step(1602).await;
        assert_eq!(reader.device.terminate_calls, 1);
        assert_eq!(reader.state, BrouteState::Open);
    }

    #[tokio::test]
    async fn test_receive_refreshes_watchdog_stamp() {
        let mut device = FakeDevice::default();
        device.inbound.push_back(response(&[("E7", "000004A5")]));
        let requests = vec![PollRequest::new(&["E7"], 10)];
        let (mut reader, mut rx) = reader(device, requests);
        reader.state = BrouteState::Join;
        reader.last_receive = 0;
        reader.requests[0].last_sent = Some(2000);

        reader.step(2000).await;
        assert_eq!(reader.last_receive, 2000);
        assert_eq!(reader.state, BrouteState::Join);
        assert_eq!(drain(&mut rx), vec![MeterRecord::new("E7", 1189.0)]);
    }

    #[tokio::test]
    async fn test_accept_instant_power_is_signed() {
        let (mut reader, mut rx) = reader(FakeDevice::default(), Vec::new());
        reader.accept(&response(&[("E7", "FFFFFC18")])).await;
        assert_eq!(drain(&mut rx), vec![MeterRecord::new("E7", -1000.0)]);
    }

    #[tokio::test]
    async fn test_accept_instant_current_emits_phases_and_sum() {
        let (mut reader, mut rx) = reader(FakeDevice::default(), Vec::new());
        reader.accept(&response(&[("E8", "00660008")])).await;
        let records = drain(&mut rx);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].epc, "E8R");
        assert!((records[0].value - 10.2).abs() < 1e-9);
        assert_eq!(records[1].epc, "E8T");
        assert!((records[1].value - 0.8).abs() < 1e-9);
        assert_eq!(records[2].epc, "E8");
        assert!((records[2].value - 11.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_accept_cumulative_uses_learned_calibration() {
        let (mut reader, mut rx) = reader(FakeDevice::default(), Vec::new());
        // Coefficient 10, unit code 0x02 (0.01 kWh).
        reader
            .accept(&response(&[("D3", "0000000A"), ("E1", "02")]))
            .await;
        reader.accept(&response(&[("E0", "00000100")])).await;

        let records = drain(&mut rx);
        assert_eq!(records[0], MeterRecord::new("D3", 10.0));
        assert_eq!(records[1], MeterRecord::new("E1", 2.0));
        assert_eq!(records[2].epc, "E0");
        // 256 * 10 * 0.01
        assert!((records[2].value - 25.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_accept_unknown_unit_code_falls_back() {
        let (mut reader, mut rx) = reader(FakeDevice::default(), Vec::new());
        reader.accept(&response(&[("E1", "05")])).await;
        assert!((reader.calibration.unit - 0.1).abs() < 1e-9);
        // The record still reports the raw code.
        assert_eq!(drain(&mut rx), vec![MeterRecord::new("E1", 5.0)]);
    }

    #[tokio::test]
    async fn test_accept_timestamped_cumulative() {
        let (mut reader, mut rx) = reader(FakeDevice::default(), Vec::new());
        reader
            .accept(&response(&[("EA", "07E9081F173B0000000100")]))
            .await;
        let records = drain(&mut rx);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].epc, "EA");
        // 256 * 1 * 0.1 with the default calibration.
        assert!((records[0].value - 25.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_accept_notification_esv_is_handled() {
        let (mut reader, mut rx) = reader(FakeDevice::default(), Vec::new());
        reader
            .accept(&frame_with("028801", "73", &[("E7", "00000100")]))
            .await;
        assert_eq!(drain(&mut rx), vec![MeterRecord::new("E7", 256.0)]);
    }

    #[tokio::test]
    async fn test_accept_rejects_foreign_seoj_and_esv() {
        let (mut reader, mut rx) = reader(FakeDevice::default(), Vec::new());
        reader
            .accept(&frame_with("05FF01", "72", &[("E7", "00000100")]))
            .await;
        reader
            .accept(&frame_with("028801", "52", &[("E7", "00000100")]))
            .await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_accept_unknown_property_emits_nothing() {
        let (mut reader, mut rx) = reader(FakeDevice::default(), Vec::new());
        reader.accept(&response(&[("FF", "00")])).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_session_restart_resets_calibration_and_schedule() {
        let (mut reader, _rx) = reader(FakeDevice::default(), Vec::new());
        reader.calibration.coefficient = 10.0;
        reader.calibration.unit = 0.01;
        reader.requests[0].last_sent = Some(1234);

        reader.restart_session();
        assert!((reader.calibration.coefficient - 1.0).abs() < 1e-9);
        assert!((reader.calibration.unit - 0.1).abs() < 1e-9);
        assert_eq!(reader.requests[0].last_sent, None);
    }

    #[test]
    fn test_tid_counter_wraps_before_ffff() {
        let (mut reader, _rx) = reader(FakeDevice::default(), Vec::new());
        reader.tid = 0xFFFD;
        assert_eq!(reader.next_tid(), 0xFFFE);
        assert_eq!(reader.next_tid(), 0);
        assert_eq!(reader.next_tid(), 1);
    }

    #[test]
    fn test_default_poll_requests() {
        let requests = default_poll_requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].epcs, vec!["D3", "D7", "E1"]);
        assert_eq!(requests[0].cycle_secs, 3600);
        assert_eq!(requests[1].epcs, vec!["E7"]);
        assert_eq!(requests[1].cycle_secs, 10);
        assert_eq!(requests[2].epcs, vec!["E0"]);
        assert_eq!(requests[2].cycle_secs, 120);
    }
}
