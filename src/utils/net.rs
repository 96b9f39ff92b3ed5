use std::net::SocketAddr;

#[cfg(test)]
use tokio::net::TcpStream;

/// accept ip either like 127.0.0.1 or docker host name: node1
pub(crate) fn address_str(addr: &str) -> String {
    format!("http://{addr}")
}

/// Checks that `addr` is a resolvable-looking `host:port` pair.
///
/// Accepts literal socket addresses (`10.0.0.5:7000`, `[::1]:7000`) and
/// DNS names (`node2.internal:7000`). No lookup is performed; the reason
/// for a rejection is returned as text.
pub fn validate_address(addr: &str) -> Result<(), String> {
    if addr.parse::<SocketAddr>().is_ok() {
        return Ok(());
    }

    let Some((host, port)) = addr.rsplit_once(':') else {
        return Err("missing port".to_string());
    };

    port.parse::<u16>().map_err(|_| format!("invalid port {port:?}"))?;

    if host.is_empty() {
        return Err("missing host".to_string());
    }
    if host.len() > 253 {
        return Err("host name too long".to_string());
    }
    for label in host.split('.') {
        let valid = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(format!("invalid host {host:?}"));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) async fn is_server_ready(addr: &str) -> bool {
    TcpStream::connect(addr).await.is_ok()
}
