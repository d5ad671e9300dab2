//! Small networking utilities

use std::net::TcpListener;
use std::ops::Range;

/// Find a free TCP port in `range`, scanning in order.
pub fn scan_free_port(range: Range<u16>) -> Option<u16> {
    for port in range {
        if TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return Some(port);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_finds_a_port() {
        let port = scan_free_port(9000..11000).expect("some port in range is free");
        assert!((9000..11000).contains(&port));
    }

    #[test]
    fn test_scan_skips_taken_port() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = taken.local_addr().unwrap().port();
        assert_eq!(scan_free_port(port..port), None);
        let found = scan_free_port(port..port.saturating_add(2));
        assert_ne!(found, Some(port));
    }
}
