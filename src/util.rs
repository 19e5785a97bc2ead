use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const HUB_PORT: &str = "HUB_PORT";

const DEFAULT_PORT: u16 = 7143;

pub fn get_port() -> u16 {
    let port_from_env = std::env::var(HUB_PORT);
    port_from_env.map_or(DEFAULT_PORT, |res| res.parse().unwrap_or(DEFAULT_PORT))
}

const HUB_ADDR: &str = "HUB_ADDR";

const DEFAULT_ADDR: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);

pub fn get_addr() -> Ipv4Addr {
    let addr_from_env = std::env::var(HUB_ADDR);
    addr_from_env.map_or(DEFAULT_ADDR, |res| res.parse().unwrap_or(DEFAULT_ADDR))
}

pub fn get_bind_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(get_addr()), get_port())
}

/// Collapse IPv4-mapped IPv6 peers (`::ffff:a.b.c.d`) to plain IPv4
pub fn canonical_ip(ip: IpAddr) -> IpAddr {
    ip.to_canonical()
}
