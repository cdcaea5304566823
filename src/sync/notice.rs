//! User-facing notices and duplicate suppression.

use std::fmt;
use std::time::{Duration, Instant};

/// Default display time for info and error notices.
pub const DEFAULT_NOTICE_TIMEOUT: Duration = Duration::from_secs(5);
/// Display time for server announcements.
pub const ANNOUNCEMENT_TIMEOUT: Duration = Duration::from_secs(10);
/// Display time for the "reconnecting" notice.
pub const RECONNECT_NOTICE_TIMEOUT: Duration = Duration::from_secs(2);
/// Display time for the "loaded from backup" notice.
pub const BACKUP_NOTICE_TIMEOUT: Duration = Duration::from_secs(3);

/// Category of a notice; decides how it is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeKind {
    /// Status information.
    Info,
    /// Connection or server problem.
    Error,
    /// A placement was rejected.
    PixelError,
    /// Broadcast from the server operators.
    Announcement,
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Error => write!(f, "error"),
            Self::PixelError => write!(f, "pixel-error"),
            Self::Announcement => write!(f, "announcement"),
        }
    }
}

/// One message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Category.
    pub kind: NoticeKind,
    /// Text to show.
    pub message: String,
    /// How long to show it.
    pub timeout: Duration,
}

impl Notice {
    /// Info notice with the default timeout.
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeKind::Info, message, DEFAULT_NOTICE_TIMEOUT)
    }

    /// Error notice with the default timeout.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NoticeKind::Error, message, DEFAULT_NOTICE_TIMEOUT)
    }

    /// Placement failure with the default timeout.
    #[must_use]
    pub fn pixel_error(message: impl Into<String>) -> Self {
        Self::new(NoticeKind::PixelError, message, DEFAULT_NOTICE_TIMEOUT)
    }

    /// Server announcement.
    #[must_use]
    pub fn announcement(message: impl Into<String>) -> Self {
        Self::new(NoticeKind::Announcement, message, ANNOUNCEMENT_TIMEOUT)
    }

    /// Notice with an explicit timeout.
    #[must_use]
    pub fn new(kind: NoticeKind, message: impl Into<String>, timeout: Duration) -> Self {
        Self {
            kind,
            message: message.into(),
            timeout,
        }
    }

    /// Same notice with a different timeout.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Drops a notice identical to the previous one inside a time window.
#[derive(Debug, Clone)]
pub struct NoticeFilter {
    window: Duration,
    last: Option<(NoticeKind, String, Instant)>,
}

impl NoticeFilter {
    /// Filter with the given suppression window. A zero window lets
    /// everything through.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// `true` if `notice` should be shown at `now`.
    pub fn admit(&mut self, notice: &Notice, now: Instant) -> bool {
        if let Some((kind, message, at)) = &self.last
            && *kind == notice.kind
            && *message == notice.message
            && now.saturating_duration_since(*at) < self.window
        {
            return false;
        }
        self.last = Some((notice.kind, notice.message.clone(), now));
        true
    }
}
