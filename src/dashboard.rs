use std::fmt;
use std::io::{self, Write};

use crate::stats::DashboardSnapshot;

const WIDTH: usize = 90;
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[1;1H";

/// Which columns the table shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// Delivery quality: latency, loss, received/expected
    #[default]
    Monitor,
    /// What went out: latest timestamp and published count per sensor
    Publisher,
}

/// Text dashboard refreshed every `every` processed readings
#[derive(Debug, Clone)]
pub struct Dashboard {
    title: String,
    every: u64,
    layout: Layout,
}

impl Dashboard {
    pub fn new(title: impl Into<String>, every: u64) -> Self {
        Self {
            title: title.into(),
            every,
            layout: Layout::Monitor,
        }
    }

    /// A dashboard that never refreshes on its own
    pub fn disabled(title: impl Into<String>) -> Self {
        Self::new(title, 0)
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn is_due(&self, processed: u64) -> bool {
        self.every > 0 && processed > 0 && processed % self.every == 0
    }

    /// Format the snapshot as a table. Same snapshot, same text.
    pub fn render(&self, snapshot: &DashboardSnapshot) -> String {
        Table {
            title: &self.title,
            layout: self.layout,
            snapshot,
        }
        .to_string()
    }

    /// Clear the terminal and redraw
    pub fn refresh<W: Write>(&self, out: &mut W, snapshot: &DashboardSnapshot) -> io::Result<()> {
        write!(out, "{}{}", CLEAR_SCREEN, self.render(snapshot))?;
        out.flush()
    }
}

struct Table<'a> {
    title: &'a str,
    layout: Layout,
    snapshot: &'a DashboardSnapshot,
}

impl Table<'_> {
    fn monitor_rows(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<15} {:<12} {:<8} {:<10} {:<10} {:<10} {:<15}",
            "Sensor", "Value", "Seq", "Lat(ms)", "Avg Lat", "Loss %", "Recv/Exp"
        )?;
        writeln!(f, "{}", "─".repeat(WIDTH))?;

        for row in &self.snapshot.rows {
            writeln!(
                f,
                "{:<15} {:<12.2} {:<8} {:<10} {:<10.2} {:<10.2} {}/{}",
                row.source_id,
                row.latest_value,
                row.latest_sequence,
                row.latest_latency,
                row.average_latency,
                row.loss_rate,
                row.received,
                row.expected
            )?;
            if row.duplicates > 0 || row.regressions > 0 {
                writeln!(
                    f,
                    "  └─ {} duplicates, {} regressions",
                    row.duplicates, row.regressions
                )?;
            }
        }

        let overall = &self.snapshot.overall;
        writeln!(f)?;
        writeln!(f, "{}", "=".repeat(WIDTH))?;
        writeln!(
            f,
            "OVERALL: Received: {} | Expected: {} | Lost: {} | Loss Rate: {:.2}%",
            overall.received, overall.expected, overall.lost, overall.loss_rate
        )
    }

    fn publisher_rows(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<15} {:<12} {:<18} {:<8} {:<12}",
            "Sensor", "Value", "Timestamp", "Seq", "Published"
        )?;
        writeln!(f, "{}", "─".repeat(WIDTH))?;

        for row in &self.snapshot.rows {
            writeln!(
                f,
                "{:<15} {:<12.2} {:<18} {:<8} {}",
                row.source_id, row.latest_value, row.latest_timestamp, row.latest_sequence, row.received
            )?;
        }

        writeln!(f)?;
        writeln!(f, "{}", "=".repeat(WIDTH))?;
        writeln!(f, "TOTAL PUBLISHED: {} messages", self.snapshot.overall.received)
    }
}

impl fmt::Display for Table<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let banner = format!(" {} ", self.title);
        writeln!(f)?;
        writeln!(f, "{:=^width$}", banner, width = WIDTH)?;
        writeln!(f)?;
        match self.layout {
            Layout::Monitor => self.monitor_rows(f)?,
            Layout::Publisher => self.publisher_rows(f)?,
        }
        writeln!(f, "{}", "=".repeat(WIDTH))
    }
}
