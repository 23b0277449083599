//! Locating the dashcam on the local network.
//!
//! A dashcam in access-point mode is the gateway (and DHCP server) of
//! the Wi-Fi network the client joins, so the camera's address is the
//! default gateway of the active Wi-Fi link.

use std::net::Ipv4Addr;
use std::path::Path;

use if_addrs::{get_if_addrs, IfAddr};
use tracing::{debug, info, warn};

const ROUTE_TABLE: &str = "/proc/net/route";

const RTF_UP: u32 = 0x0001;
const RTF_GATEWAY: u32 = 0x0002;

/// Supplies the address of the camera from the active network link.
pub trait GatewayResolver: Send + Sync {
    /// `None` when no usable Wi-Fi link is up.
    fn gateway(&self) -> Option<Ipv4Addr>;
}

/// A fixed address, for configured cameras and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticGateway(pub Ipv4Addr);

impl GatewayResolver for StaticGateway {
    fn gateway(&self) -> Option<Ipv4Addr> {
        Some(self.0)
    }
}

/// Resolves the gateway from the host's routing table, falling back to
/// the first host of a private subnet on a wireless interface.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemGateway;

impl GatewayResolver for SystemGateway {
    fn gateway(&self) -> Option<Ipv4Addr> {
        if let Some(gw) = route_table_gateway(Path::new(ROUTE_TABLE)) {
            info!("Gateway from routing table: {gw}");
            return Some(gw);
        }
        let fallback = interface_gateway();
        match fallback {
            Some(gw) => info!("Gateway guessed from interface subnet: {gw}"),
            None => warn!("No Wi-Fi gateway found"),
        }
        fallback
    }
}

// ── routing table ────────────────────────────────────────────────────────

/// One default route as read from the routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DefaultRoute {
    iface: String,
    gateway: Ipv4Addr,
    metric: u32,
}

impl DefaultRoute {
    fn is_wireless(&self) -> bool {
        is_wireless(&self.iface)
    }
}

fn route_table_gateway(path: &Path) -> Option<Ipv4Addr> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            debug!("Cannot read {}: {e}", path.display());
            return None;
        }
    };
    best_route(parse_route_table(&text)).map(|r| r.gateway)
}

/// Parse the kernel's `/proc/net/route` format, keeping usable default routes.
fn parse_route_table(text: &str) -> Vec<DefaultRoute> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 7 {
                return None;
            }
            let (iface, destination, gateway, flags, metric) =
                (cols[0], cols[1], cols[2], cols[3], cols[6]);
            if iface == "lo" || destination != "00000000" {
                return None;
            }
            let flags = u32::from_str_radix(flags, 16).ok()?;
            if flags & (RTF_UP | RTF_GATEWAY) != (RTF_UP | RTF_GATEWAY) {
                return None;
            }
            // The kernel prints the address in host (little-endian) order.
            let raw = u32::from_str_radix(gateway, 16).ok()?;
            Some(DefaultRoute {
                iface: iface.to_string(),
                gateway: Ipv4Addr::from(raw.to_le_bytes()),
                metric: metric.parse().unwrap_or(u32::MAX),
            })
        })
        .collect()
}

/// Lowest-metric default route of a wireless link.  Wired routes never
/// qualify: a LAN router is not a dashcam.
fn best_route(routes: Vec<DefaultRoute>) -> Option<DefaultRoute> {
    routes
        .into_iter()
        .filter(DefaultRoute::is_wireless)
        .min_by_key(|r| r.metric)
}

// ── interface fallback ───────────────────────────────────────────────────

fn interface_gateway() -> Option<Ipv4Addr> {
    let interfaces = match get_if_addrs() {
        Ok(i) => i,
        Err(e) => {
            warn!("Cannot enumerate network interfaces: {e}");
            return None;
        }
    };

    let links = interfaces
        .iter()
        .filter(|i| !i.is_loopback())
        .filter_map(|i| match &i.addr {
            IfAddr::V4(v4) => Some((i.name.as_str(), v4.ip, v4.netmask)),
            _ => None,
        });
    wireless_subnet_gateway(links)
}

/// First host of the first private subnet on a wireless link.
fn wireless_subnet_gateway<'a>(
    links: impl IntoIterator<Item = (&'a str, Ipv4Addr, Ipv4Addr)>,
) -> Option<Ipv4Addr> {
    links
        .into_iter()
        .find(|(name, ip, _)| is_wireless(name) && ip.is_private())
        .map(|(_, ip, netmask)| first_host(ip, netmask))
}

fn is_wireless(iface: &str) -> bool {
    iface.starts_with("wl")
}

/// First host address of the subnet `ip` belongs to.
fn first_host(ip: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    let network = u32::from(ip) & u32::from(netmask);
    Ipv4Addr::from(network.wrapping_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTES: &str = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
eth0\t00000000\t0101A8C0\t0003\t0\t0\t100\t00000000\t0\t0\t0
eth0\t0001A8C0\t00000000\t0001\t0\t0\t100\t00FFFFFF\t0\t0\t0
wlan0\t00000000\t0100A8C0\t0003\t0\t0\t600\t00000000\t0\t0\t0
wlan0\t0000A8C0\t00000000\t0001\t0\t0\t600\t00FFFFFF\t0\t0\t0
";

    #[test]
    fn test_parse_route_table() {
        let routes = parse_route_table(ROUTES);
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].gateway, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(routes[1].iface, "wlan0");
        assert_eq!(routes[1].gateway, Ipv4Addr::new(192, 168, 0, 1));
        assert_eq!(routes[1].metric, 600);
    }

    #[test]
    fn test_best_route_prefers_wireless() {
        let best = best_route(parse_route_table(ROUTES)).unwrap();
        assert_eq!(best.gateway, Ipv4Addr::new(192, 168, 0, 1));

        let wired_only = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
eth0\t00000000\t0101A8C0\t0003\t0\t0\t100\t00000000\t0\t0\t0
enp3s0\t00000000\t0102A8C0\t0003\t0\t0\t50\t00000000\t0\t0\t0
";
        assert_eq!(parse_route_table(wired_only).len(), 2);
        assert_eq!(best_route(parse_route_table(wired_only)), None);
    }

    #[test]
    fn test_best_route_lowest_wireless_metric() {
        let text = "Iface\tDestination\tGateway\tFlags\tRefCnt\tUse\tMetric\n\
                    wlan0\t00000000\t0100A8C0\t0003\t0\t0\t600\n\
                    wlp2s0\t00000000\t01FEA8C0\t0003\t0\t0\t20\n";
        let best = best_route(parse_route_table(text)).unwrap();
        assert_eq!(best.iface, "wlp2s0");
        assert_eq!(best.gateway, Ipv4Addr::new(192, 168, 254, 1));
    }

    #[test]
    fn test_subnet_gateway_needs_wireless_link() {
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        let wired = [("eth0", Ipv4Addr::new(192, 168, 1, 20), mask)];
        assert_eq!(wireless_subnet_gateway(wired), None);

        let mixed = [
            ("eth0", Ipv4Addr::new(192, 168, 1, 20), mask),
            ("wlan0", Ipv4Addr::new(8, 8, 8, 8), mask),
            ("wlan1", Ipv4Addr::new(192, 168, 0, 42), mask),
        ];
        assert_eq!(
            wireless_subnet_gateway(mixed),
            Some(Ipv4Addr::new(192, 168, 0, 1))
        );
    }

    #[test]
    fn test_routes_without_gateway_flag_are_ignored() {
        let text = "Iface\tDestination\tGateway\tFlags\tRefCnt\tUse\tMetric\n\
                    wlan0\t00000000\t0100A8C0\t0001\t0\t0\t0\n\
                    garbage\n";
        assert!(parse_route_table(text).is_empty());
    }

    #[test]
    fn test_missing_route_table() {
        assert_eq!(route_table_gateway(Path::new("/nonexistent/route")), None);
    }

    #[test]
    fn test_first_host() {
        assert_eq!(
            first_host(Ipv4Addr::new(192, 168, 0, 23), Ipv4Addr::new(255, 255, 255, 0)),
            Ipv4Addr::new(192, 168, 0, 1)
        );
        assert_eq!(
            first_host(Ipv4Addr::new(10, 1, 2, 3), Ipv4Addr::new(255, 0, 0, 0)),
            Ipv4Addr::new(10, 0, 0, 1)
        );
    }

    #[test]
    fn test_static_gateway() {
        let gw = StaticGateway(Ipv4Addr::new(192, 168, 0, 1));
        assert_eq!(gw.gateway(), Some(Ipv4Addr::new(192, 168, 0, 1)));
    }
}
