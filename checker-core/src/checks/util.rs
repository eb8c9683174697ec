use std::time::Duration;

use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use crate::error::{Error, Result};

const DAY: u64 = 24 * 3600;
const YEAR: u64 = 365 * DAY;

/// Dial the given address with a timeout and drop the connection.
///
/// A UDP "dial" only binds and connects the socket; like any connectionless
/// dial it succeeds without sending a packet.
pub(crate) async fn dial(protocol: &str, address: &str, limit: Duration) -> Result<()> {
    match protocol {
        "tcp" => {
            timeout(limit, TcpStream::connect(address))
                .await
                .map_err(|_| Error::Connect(format!("dial {address}: i/o timeout")))?
                .map_err(|e| Error::Connect(e.to_string()))?;
            Ok(())
        }
        "udp" => {
            let socket = UdpSocket::bind("0.0.0.0:0")
                .await
                .map_err(|e| Error::Connect(e.to_string()))?;
            timeout(limit, socket.connect(address))
                .await
                .map_err(|_| Error::Connect(format!("dial {address}: i/o timeout")))?
                .map_err(|e| Error::Connect(e.to_string()))?;
            Ok(())
        }
        other => Err(Error::Configuration(format!("unknown protocol: {other}"))),
    }
}

/// Validate a dial protocol at construction time.
pub(crate) fn validate_protocol(protocol: &str) -> Result<()> {
    match protocol {
        "tcp" | "udp" => Ok(()),
        other => Err(Error::Configuration(format!(
            "unsupported protocol: {other}"
        ))),
    }
}

/// Format a duration for humans, using day/year units for long spans.
pub(crate) fn human_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    if total < DAY {
        return format_hms(total);
    }

    let mut out = String::new();
    let mut rest = total;
    if rest >= YEAR {
        out.push_str(&format!("{}y", rest / YEAR));
        rest %= YEAR;
    }
    out.push_str(&format!("{}d{}", rest / DAY, format_hms(rest % DAY)));
    out
}

fn format_hms(total: u64) -> String {
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_duration() {
        assert_eq!(human_duration(Duration::from_secs(30)), "30s");
        assert_eq!(human_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(human_duration(Duration::from_secs(3 * 3600 + 60)), "3h1m0s");
        assert_eq!(human_duration(Duration::from_secs(2 * DAY + 3600)), "2d1h0m0s");
        assert_eq!(human_duration(Duration::from_secs(YEAR + DAY)), "1y1d0s");
    }

    #[test]
    fn test_validate_protocol() {
        assert!(validate_protocol("tcp").is_ok());
        assert!(validate_protocol("udp").is_ok());
        assert!(validate_protocol("unixgram").is_err());
    }
}
