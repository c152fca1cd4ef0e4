//! UPnP client (§4.9): SSDP discovery of an Internet Gateway Device, then
//! hand-rolled SOAP requests over a plain `TcpStream` for port mapping and
//! external-IP queries.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

pub const SSDP_ADDR: &str = "239.255.255.250:1900";
pub const SEARCH_TARGET: &str = "upnp:rootdevice";
pub const SSDP_TIMEOUT: Duration = Duration::from_secs(3);
pub const WAN_IP_CONNECTION: &str = "urn:schemas-upnp-org:service:WANIPConnection:1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpnpError {
    Io(String),
    NoGatewayFound,
    MalformedResponse,
}

impl std::fmt::Display for UpnpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpnpError::Io(e) => write!(f, "upnp io error: {e}"),
            UpnpError::NoGatewayFound => write!(f, "no internet gateway device responded"),
            UpnpError::MalformedResponse => write!(f, "malformed SOAP response"),
        }
    }
}

impl std::error::Error for UpnpError {}

/// A discovered gateway's control endpoint, parsed from the SSDP `LOCATION`
/// header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gateway {
    pub control_url: String,
}

fn build_m_search() -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {SSDP_ADDR}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: 2\r\n\
         ST: {SEARCH_TARGET}\r\n\
         \r\n"
    )
}

fn extract_location(response: &str) -> Option<String> {
    response
        .lines()
        .find(|line| line.to_ascii_uppercase().starts_with("LOCATION:"))
        .map(|line| line.splitn(2, ':').nth(1).unwrap_or("").trim().to_string())
}

fn mentions_gateway_service(response: &str) -> bool {
    ["InternetGatewayDevice", "WANIPConnection", "WANPPPConnection"]
        .iter()
        .any(|needle| response.contains(needle))
}

/// Send an SSDP M-SEARCH and collect any `LOCATION` headers from responses
/// that mention a gateway service. Real device discovery requires parsing
/// the device description XML at that location to get the actual control
/// URL; callers without a full HTTP+XML stack available may mock this step,
/// per the interface contract.
pub async fn discover() -> Result<Vec<String>, UpnpError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(|e| UpnpError::Io(e.to_string()))?;
    let target: SocketAddr = SSDP_ADDR.parse().unwrap();
    socket
        .send_to(build_m_search().as_bytes(), target)
        .await
        .map_err(|e| UpnpError::Io(e.to_string()))?;

    let mut locations = Vec::new();
    let deadline = tokio::time::Instant::now() + SSDP_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        let mut buf = [0u8; 2048];
        match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((n, _))) => {
                if let Ok(text) = std::str::from_utf8(&buf[..n]) {
                    if mentions_gateway_service(text) {
                        if let Some(location) = extract_location(text) {
                            locations.push(location);
                        }
                    }
                }
            }
            _ => break,
        }
    }

    if locations.is_empty() {
        return Err(UpnpError::NoGatewayFound);
    }
    Ok(locations)
}

fn soap_envelope(action: &str, body: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?>\
         <s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\" \
         s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\">\
         <s:Body><u:{action} xmlns:u=\"{WAN_IP_CONNECTION}\">{body}</u:{action}></s:Body>\
         </s:Envelope>"
    )
}

async fn soap_post(control_url: &str, action: &str, body: String) -> Result<String, UpnpError> {
    let addr: SocketAddr = control_url
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or("")
        .parse()
        .map_err(|_| UpnpError::MalformedResponse)?;

    let path = control_url.splitn(2, addr.to_string().as_str()).nth(1).unwrap_or("/");
    let envelope = soap_envelope(action, &body);

    let request = format!(
        "POST {path} HTTP/1.1\r\n\
         HOST: {addr}\r\n\
         CONTENT-TYPE: text/xml; charset=\"utf-8\"\r\n\
         CONTENT-LENGTH: {}\r\n\
         SOAPACTION: \"{WAN_IP_CONNECTION}#{action}\"\r\n\
         CONNECTION: close\r\n\
         \r\n\
         {envelope}",
        envelope.len()
    );

    let mut stream = TcpStream::connect(addr).await.map_err(|e| UpnpError::Io(e.to_string()))?;
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| UpnpError::Io(e.to_string()))?;

    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .map_err(|e| UpnpError::Io(e.to_string()))?;
    Ok(response)
}

/// `AddPortMapping`: map `external_port` on the gateway to
/// `(internal_client, internal_port)`.
pub async fn add_port_mapping(
    gateway: &Gateway,
    external_port: u16,
    internal_client: &str,
    internal_port: u16,
    protocol: Protocol,
    description: &str,
    lease_duration_secs: u32,
) -> Result<(), UpnpError> {
    let body = format!(
        "<NewRemoteHost></NewRemoteHost>\
         <NewExternalPort>{external_port}</NewExternalPort>\
         <NewProtocol>{}</NewProtocol>\
         <NewInternalPort>{internal_port}</NewInternalPort>\
         <NewInternalClient>{internal_client}</NewInternalClient>\
         <NewEnabled>1</NewEnabled>\
         <NewPortMappingDescription>{description}</NewPortMappingDescription>\
         <NewLeaseDuration>{lease_duration_secs}</NewLeaseDuration>",
        protocol.as_str()
    );
    soap_post(&gateway.control_url, "AddPortMapping", body).await?;
    Ok(())
}

/// `DeletePortMapping`: remove a previously added mapping.
pub async fn remove_port_mapping(gateway: &Gateway, external_port: u16, protocol: Protocol) -> Result<(), UpnpError> {
    let body = format!(
        "<NewRemoteHost></NewRemoteHost>\
         <NewExternalPort>{external_port}</NewExternalPort>\
         <NewProtocol>{}</NewProtocol>",
        protocol.as_str()
    );
    soap_post(&gateway.control_url, "DeletePortMapping", body).await?;
    Ok(())
}

/// `GetExternalIPAddress`.
pub async fn get_external_ip(gateway: &Gateway) -> Result<String, UpnpError> {
    let response = soap_post(&gateway.control_url, "GetExternalIPAddress", String::new()).await?;
    response
        .split("<NewExternalIPAddress>")
        .nth(1)
        .and_then(|rest| rest.split("</NewExternalIPAddress>").next())
        .map(str::to_string)
        .ok_or(UpnpError::MalformedResponse)
}

/// Remove every mapping this process is tracking. Bookkeeping of which
/// mappings were added is the caller's responsibility; this just fans out
/// `remove_port_mapping` over the given list.
pub async fn remove_all_port_mappings(
    gateway: &Gateway,
    mappings: &[(u16, Protocol)],
) -> Result<(), UpnpError> {
    for &(port, protocol) in mappings {
        remove_port_mapping(gateway, port, protocol).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_location_finds_the_header_case_insensitively() {
        let response = "HTTP/1.1 200 OK\r\nlocation: http://192.168.1.1:5000/desc.xml\r\nST: upnp:rootdevice\r\n\r\n";
        assert_eq!(
            extract_location(response),
            Some("http://192.168.1.1:5000/desc.xml".to_string())
        );
    }

    #[test]
    fn mentions_gateway_service_detects_wan_ip_connection() {
        let response = "...WANIPConnection:1...";
        assert!(mentions_gateway_service(response));
        assert!(!mentions_gateway_service("unrelated device"));
    }

    #[test]
    fn soap_envelope_contains_the_action_and_namespace() {
        let envelope = soap_envelope("AddPortMapping", "<NewExternalPort>9000</NewExternalPort>");
        assert!(envelope.contains("u:AddPortMapping"));
        assert!(envelope.contains(WAN_IP_CONNECTION));
        assert!(envelope.contains("<NewExternalPort>9000</NewExternalPort>"));
    }
}
