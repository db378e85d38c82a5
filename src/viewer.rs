//! ==============================================================================
//! viewer.rs - client-side rolling-window consumer
//! ==============================================================================
//!
//! purpose:
//!     the dashboard half of the push protocol, kept free of any io so a
//!     native or wasm front end can embed it:
//!     - Dashboard folds push events into the latest reading, a 100-entry
//!       history table and four 20-point chart buffers.
//!     - ViewerLink tracks the one websocket the front end holds and tells
//!       it when to reconnect.
//!
//! chart buffers:
//!
//! ```text
//!     labels  [t1  t2  ...  t20]   <- oldest on the left
//!     dht     [d1  d2  ...  d20]
//!     lm35    [l1  l2  ...  l20]
//!     led     [e1  e2  ...  e20]
//!
//!     all four always have the same length.
//! ```
//!
//! ==============================================================================

use chrono::{DateTime, Local, Utc};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::domain::{Reading, ViewerEvent, ViewerRequest};

/// points kept per chart series
pub const DISPLAY_CAPACITY: usize = 20;
/// rows kept in the history table when pushes arrive
pub const HISTORY_CAPACITY: usize = 100;
/// wait between a dropped socket and the next attempt
pub const RECONNECT_DELAY: Duration = Duration::from_millis(3000);

// ==============================================================================
// chart buffers
// ==============================================================================

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DisplayBuffers {
    pub labels: VecDeque<String>,
    pub dht: VecDeque<f64>,
    pub lm35: VecDeque<f64>,
    pub led: VecDeque<u8>,
}

/// one row of the combined chart
#[derive(Clone, Debug, PartialEq)]
pub struct ChartPoint<'a> {
    pub time: &'a str,
    pub dht: f64,
    pub lm35: f64,
    pub led: u8,
}

impl DisplayBuffers {
    /// rebuild from a newest-first sequence
    pub fn from_newest_first(readings: &[Reading]) -> Self {
        let mut buffers = Self::default();
        for reading in readings.iter().take(DISPLAY_CAPACITY).rev() {
            buffers.push_back(reading);
        }
        buffers
    }

    /// append one point, dropping the oldest from every series when full
    pub fn push(&mut self, reading: &Reading) {
        self.push_back(reading);
        if self.labels.len() > DISPLAY_CAPACITY {
            self.labels.pop_front();
            self.dht.pop_front();
            self.lm35.pop_front();
            self.led.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = ChartPoint<'_>> + '_ {
        (0..self.len()).map(move |i| ChartPoint {
            time: &self.labels[i],
            dht: self.dht[i],
            lm35: self.lm35[i],
            led: self.led[i],
        })
    }

    fn push_back(&mut self, reading: &Reading) {
        self.labels.push_back(time_label(&reading.timestamp));
        self.dht.push_back(reading.dht_temperature);
        self.lm35.push_back(reading.lm35_temperature);
        self.led.push_back(reading.led_level);
    }
}

/// wall-clock label in the viewer's local zone
pub fn time_label(timestamp: &DateTime<Utc>) -> String {
    timestamp.with_timezone(&Local).format("%H:%M:%S").to_string()
}

/// badge shown next to a reading's led level
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LevelStatus {
    Normal,
    Elevated,
    HighTemp,
}

impl LevelStatus {
    pub fn from_level(level: u8) -> Self {
        match level {
            3.. => LevelStatus::HighTemp,
            2 => LevelStatus::Elevated,
            _ => LevelStatus::Normal,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LevelStatus::Normal => "Normal",
            LevelStatus::Elevated => "Elevated",
            LevelStatus::HighTemp => "High Temp",
        }
    }
}

// ==============================================================================
// dashboard state
// ==============================================================================

#[derive(Clone, Debug, Default)]
pub struct Dashboard {
    latest: Option<Reading>,
    history: VecDeque<Reading>,
    buffers: DisplayBuffers,
    upstream_connected: bool,
}

impl Dashboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.latest.as_ref()
    }

    /// newest first
    pub fn history(&self) -> &VecDeque<Reading> {
        &self.history
    }

    pub fn buffers(&self) -> &DisplayBuffers {
        &self.buffers
    }

    /// hotter of the two sensors in the latest reading
    pub fn max_temperature(&self) -> Option<f64> {
        self.latest
            .as_ref()
            .map(|r| r.dht_temperature.max(r.lm35_temperature))
    }

    /// whether the relay reports its broker link as up
    pub fn upstream_connected(&self) -> bool {
        self.upstream_connected
    }

    pub fn apply(&mut self, event: ViewerEvent) {
        match event {
            ViewerEvent::SensorData { data } => {
                self.buffers.push(&data);
                self.history.push_front(data.clone());
                self.history.truncate(HISTORY_CAPACITY);
                self.latest = Some(data);
            }
            ViewerEvent::HistoricalData { data } => {
                // an empty reply replaces the table but leaves the charts alone
                if let Some(newest) = data.first() {
                    self.buffers = DisplayBuffers::from_newest_first(&data);
                    self.latest = Some(newest.clone());
                }
                self.history = data.into();
            }
            ViewerEvent::ConnectionStatus { connected } => {
                self.upstream_connected = connected;
            }
        }
    }

    /// decode and apply one text frame; undecodable frames change nothing
    pub fn apply_frame(&mut self, text: &str) -> serde_json::Result<()> {
        let event = ViewerEvent::from_frame(text)?;
        self.apply(event);
        Ok(())
    }
}

// ==============================================================================
// transport
// ==============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// the front end's one websocket to the relay.
/// the embedder performs the io and reports back through on_* calls.
#[derive(Clone, Debug)]
pub struct ViewerLink {
    state: LinkState,
    connected: bool,
    reconnect_at: Option<Instant>,
    delay: Duration,
}

impl Default for ViewerLink {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewerLink {
    pub fn new() -> Self {
        Self::with_delay(RECONNECT_DELAY)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            state: LinkState::Idle,
            connected: false,
            reconnect_at: None,
            delay,
        }
    }

    /// `ws://host/ws`, or `wss://` when the page itself is served securely
    pub fn url(host: &str, secure: bool) -> String {
        let scheme = if secure { "wss" } else { "ws" };
        format!("{scheme}://{host}/ws")
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn next_reconnect(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// returns true when the embedder should open a socket now;
    /// false while one is already open or opening
    pub fn connect(&mut self) -> bool {
        match self.state {
            LinkState::Connecting | LinkState::Open => false,
            LinkState::Idle | LinkState::Closed => {
                self.state = LinkState::Connecting;
                true
            }
        }
    }

    pub fn on_open(&mut self) {
        self.state = LinkState::Open;
        self.connected = true;
        self.reconnect_at = None;
    }

    /// schedules exactly one reconnect; a later close replaces it
    pub fn on_close(&mut self, now: Instant) {
        self.state = LinkState::Closed;
        self.connected = false;
        self.reconnect_at = Some(now + self.delay);
    }

    /// errors are always followed by a close, which owns the reconnect
    pub fn on_error(&mut self) {
        self.connected = false;
    }

    /// true once, when the scheduled reconnect is due and a socket should open
    pub fn poll_reconnect(&mut self, now: Instant) -> bool {
        match self.reconnect_at {
            Some(at) if now >= at => {
                self.reconnect_at = None;
                self.connect()
            }
            _ => false,
        }
    }

    /// frame to send, or None when the link is not open (the request is dropped)
    pub fn history_request(&self, limit: usize) -> Option<String> {
        if self.state != LinkState::Open {
            return None;
        }
        serde_json::to_string(&ViewerRequest::GetHistoricalData { limit: Some(limit) }).ok()
    }

    /// tear down: cancel any pending reconnect and forget the socket
    pub fn shutdown(&mut self) {
        self.reconnect_at = None;
        self.connected = false;
        self.state = LinkState::Idle;
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn reading(id: u64) -> Reading {
        let base: DateTime<Utc> = "2025-03-01T12:00:00Z".parse().unwrap();
        Reading {
            id,
            device_id: "G.231.22.0002".into(),
            dht_temperature: id as f64,
            lm35_temperature: id as f64 + 0.5,
            led_level: (id % 4) as u8,
            timestamp: base + ChronoDuration::seconds(id as i64),
        }
    }

    fn assert_lockstep(buffers: &DisplayBuffers) {
        assert_eq!(buffers.labels.len(), buffers.dht.len());
        assert_eq!(buffers.dht.len(), buffers.lm35.len());
        assert_eq!(buffers.lm35.len(), buffers.led.len());
    }

    #[test]
    fn pushes_keep_the_last_twenty_in_arrival_order() {
        let mut dashboard = Dashboard::new();
        for id in 1..=25 {
            dashboard.apply(ViewerEvent::SensorData { data: reading(id) });
            assert_lockstep(dashboard.buffers());
        }

        let buffers = dashboard.buffers();
        assert_eq!(buffers.len(), DISPLAY_CAPACITY);
        let dht: Vec<f64> = buffers.dht.iter().copied().collect();
        let expected: Vec<f64> = (6..=25).map(|i| i as f64).collect();
        assert_eq!(dht, expected);
        assert_eq!(buffers.led.back(), Some(&1));

        assert_eq!(dashboard.latest().map(|r| r.id), Some(25));
        assert_eq!(dashboard.history().len(), 25);
        assert_eq!(dashboard.history().front().map(|r| r.id), Some(25));
    }

    #[test]
    fn history_caps_at_one_hundred() {
        let mut dashboard = Dashboard::new();
        for id in 1..=130 {
            dashboard.apply(ViewerEvent::SensorData { data: reading(id) });
        }
        assert_eq!(dashboard.history().len(), HISTORY_CAPACITY);
        assert_eq!(dashboard.history().front().map(|r| r.id), Some(130));
        assert_eq!(dashboard.history().back().map(|r| r.id), Some(31));
    }

    #[test]
    fn historical_data_rebuilds_buffers_oldest_to_newest() {
        let mut dashboard = Dashboard::new();
        dashboard.apply(ViewerEvent::SensorData { data: reading(999) });

        // newest first: 30, 29, ..., 1
        let data: Vec<Reading> = (1..=30).rev().map(reading).collect();
        dashboard.apply(ViewerEvent::HistoricalData { data });

        let buffers = dashboard.buffers();
        assert_lockstep(buffers);
        let dht: Vec<f64> = buffers.dht.iter().copied().collect();
        let expected: Vec<f64> = (11..=30).map(|i| i as f64).collect();
        assert_eq!(dht, expected);

        assert_eq!(dashboard.latest().map(|r| r.id), Some(30));
        // replaced wholesale, not merged
        assert_eq!(dashboard.history().len(), 30);
        assert!(dashboard.history().iter().all(|r| r.id != 999));
    }

    #[test]
    fn empty_history_keeps_latest_and_charts() {
        let mut dashboard = Dashboard::new();
        dashboard.apply(ViewerEvent::SensorData { data: reading(3) });
        dashboard.apply(ViewerEvent::SensorData { data: reading(4) });
        let charts = dashboard.buffers().clone();

        dashboard.apply(ViewerEvent::HistoricalData { data: vec![] });

        assert_eq!(dashboard.latest().map(|r| r.id), Some(4));
        assert!(dashboard.history().is_empty());
        assert_eq!(dashboard.buffers(), &charts);
        assert_eq!(dashboard.buffers().len(), 2);
    }

    #[test]
    fn max_temperature_picks_the_hotter_sensor() {
        let mut dashboard = Dashboard::new();
        assert_eq!(dashboard.max_temperature(), None);

        dashboard.apply(ViewerEvent::SensorData { data: reading(7) });
        assert_eq!(dashboard.max_temperature(), Some(7.5));

        let mut cooler_lm35 = reading(8);
        cooler_lm35.lm35_temperature = 2.0;
        dashboard.apply(ViewerEvent::SensorData { data: cooler_lm35 });
        assert_eq!(dashboard.max_temperature(), Some(8.0));
    }

    #[test]
    fn connection_status_touches_only_the_flag() {
        let mut dashboard = Dashboard::new();
        dashboard.apply(ViewerEvent::SensorData { data: reading(1) });
        let before = dashboard.buffers().clone();

        dashboard
            .apply_frame(r#"{"type":"connection_status","connected":true}"#)
            .unwrap();
        assert!(dashboard.upstream_connected());
        assert_eq!(dashboard.buffers(), &before);
        assert_eq!(dashboard.history().len(), 1);

        assert!(dashboard.apply_frame("not json").is_err());
        assert!(dashboard.upstream_connected());
    }

    #[test]
    fn chart_points_line_up() {
        let buffers = DisplayBuffers::from_newest_first(&[reading(2), reading(1)]);
        let points: Vec<ChartPoint<'_>> = buffers.points().collect();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].dht, 1.0);
        assert_eq!(points[1].lm35, 2.5);
        assert_eq!(points[1].led, 2);
    }

    #[test]
    fn level_badges() {
        assert_eq!(LevelStatus::from_level(0).label(), "Normal");
        assert_eq!(LevelStatus::from_level(1).label(), "Normal");
        assert_eq!(LevelStatus::from_level(2).label(), "Elevated");
        assert_eq!(LevelStatus::from_level(3).label(), "High Temp");
    }

    #[test]
    fn link_allows_one_socket_at_a_time() {
        let mut link = ViewerLink::new();
        assert!(link.connect());
        assert!(!link.connect());
        link.on_open();
        assert!(!link.connect());
        assert!(link.is_connected());
        assert_eq!(ViewerLink::url("dash.local:3000", false), "ws://dash.local:3000/ws");
        assert_eq!(ViewerLink::url("dash.example", true), "wss://dash.example/ws");
    }

    #[test]
    fn close_schedules_exactly_one_reconnect() {
        let now = Instant::now();
        let mut link = ViewerLink::new();
        link.connect();
        link.on_open();

        link.on_error();
        assert!(!link.is_connected());
        assert_eq!(link.next_reconnect(), None);

        link.on_close(now);
        assert_eq!(link.next_reconnect(), Some(now + RECONNECT_DELAY));

        assert!(!link.poll_reconnect(now + Duration::from_millis(2999)));
        assert!(link.poll_reconnect(now + RECONNECT_DELAY));
        assert_eq!(link.state(), LinkState::Connecting);
        // fired once, not again
        assert!(!link.poll_reconnect(now + Duration::from_secs(10)));

        link.on_open();
        assert_eq!(link.next_reconnect(), None);
    }

    #[test]
    fn open_clears_a_pending_reconnect() {
        let now = Instant::now();
        let mut link = ViewerLink::new();
        link.connect();
        link.on_close(now);
        assert!(link.connect());
        link.on_open();
        assert_eq!(link.next_reconnect(), None);
        assert!(!link.poll_reconnect(now + Duration::from_secs(60)));
    }

    #[test]
    fn history_requests_only_go_out_while_open() {
        let mut link = ViewerLink::new();
        assert_eq!(link.history_request(50), None);
        link.connect();
        link.on_open();
        assert_eq!(
            link.history_request(50).as_deref(),
            Some(r#"{"type":"get_historical_data","limit":50}"#)
        );
        link.shutdown();
        assert_eq!(link.history_request(50), None);
        assert_eq!(link.next_reconnect(), None);
    }
}
