use std::time::{Duration, Instant};

use anyhow::Result;
use mdns_sd::{ServiceDaemon, ServiceEvent};
use tracing::{debug, info, warn};

pub const GAMESTREAM_SERVICE: &str = "_nvstream._tcp.local.";

/// Browses the LAN for streaming hosts until `timeout` elapses.
pub fn discover_hosts(timeout: Duration) -> Result<Vec<String>> {
    let daemon = ServiceDaemon::new()?;
    let receiver = daemon.browse(GAMESTREAM_SERVICE)?;
    let deadline = Instant::now() + timeout;
    let mut found = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match receiver.recv_timeout(remaining) {
            Ok(ServiceEvent::ServiceResolved(info)) => {
                for addr in info.get_addresses() {
                    if push_unique(&mut found, addr.to_string()) {
                        debug!("discovered {} ({})", addr, info.get_fullname());
                    }
                }
            }
            Ok(_) => continue,
            Err(_) => break,
        }
    }

    if let Err(e) = daemon.shutdown() {
        warn!("mdns shutdown failed: {}", e);
    }
    info!("discovered {} hosts", found.len());
    Ok(found)
}

fn push_unique(found: &mut Vec<String>, addr: String) -> bool {
    if found.contains(&addr) {
        false
    } else {
        found.push(addr);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_push_unique() {
        let mut found = Vec::new();
        let addr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));
        assert!(push_unique(&mut found, addr.to_string()));
        assert!(!push_unique(&mut found, addr.to_string()));
        assert_eq!(found, vec!["192.168.1.20".to_string()]);
    }
}
