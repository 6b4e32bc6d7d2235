use chrono::{DateTime, Duration, Utc};

/// Fixed look-back window of the admin metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricsWindow {
    Hours24,
    Days7,
    Days30,
}

impl MetricsWindow {
    pub const BASIC: [MetricsWindow; 2] = [MetricsWindow::Hours24, MetricsWindow::Days7];
    pub const EXTENDED: [MetricsWindow; 3] = [
        MetricsWindow::Hours24,
        MetricsWindow::Days7,
        MetricsWindow::Days30,
    ];

    pub fn for_variant(extended: bool) -> &'static [MetricsWindow] {
        if extended {
            &Self::EXTENDED
        } else {
            &Self::BASIC
        }
    }

    pub fn duration(self) -> Duration {
        match self {
            MetricsWindow::Hours24 => Duration::hours(24),
            MetricsWindow::Days7 => Duration::days(7),
            MetricsWindow::Days30 => Duration::days(30),
        }
    }

    /// Start of the window ending at `now`.
    pub fn since(self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.duration()
    }

    /// Suffix of per-window snapshot fields (`visitors24h`, `cost7d`).
    pub fn suffix(self) -> &'static str {
        match self {
            MetricsWindow::Hours24 => "24h",
            MetricsWindow::Days7 => "7d",
            MetricsWindow::Days30 => "30d",
        }
    }

    /// Snapshot key carrying the window's boundary timestamp.
    pub fn boundary_key(self) -> &'static str {
        match self {
            MetricsWindow::Hours24 => "h24",
            MetricsWindow::Days7 => "d7",
            MetricsWindow::Days30 => "d30",
        }
    }
}
