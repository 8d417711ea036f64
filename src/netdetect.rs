use if_addrs::get_if_addrs;
use std::net::IpAddr;

use crate::error::ScanError;

/// One local address bound to a named interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddr {
    pub name: String,
    pub address: IpAddr,
}

impl InterfaceAddr {
    pub fn new(name: impl Into<String>, address: IpAddr) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }
}

/// Source of the `(name, address)` snapshot the resolver works on.
pub trait InterfaceSource: Send + Sync {
    fn interfaces(&self) -> Result<Vec<InterfaceAddr>, ScanError>;
}

/// Enumerates the host's interfaces through `if-addrs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn interfaces(&self) -> Result<Vec<InterfaceAddr>, ScanError> {
        list_interfaces()
    }
}

/// List every address of every local interface, loopback included, in OS order.
pub fn list_interfaces() -> Result<Vec<InterfaceAddr>, ScanError> {
    let addrs = get_if_addrs().map_err(|e| ScanError::Enumerate(e.to_string()))?;
    Ok(addrs
        .into_iter()
        .map(|iface| {
            let address = iface.ip();
            InterfaceAddr::new(iface.name, address)
        })
        .collect())
}

/// Pick the first interface whose address text starts with `trusted_prefix`.
///
/// Pure over its input: the same snapshot always yields the same name.
pub fn resolve_interface(
    interfaces: &[InterfaceAddr],
    trusted_prefix: &str,
) -> Result<String, ScanError> {
    interfaces
        .iter()
        .find(|iface| iface.address.to_string().starts_with(trusted_prefix))
        .map(|iface| iface.name.clone())
        .ok_or_else(|| ScanError::NoInterfaceFound {
            prefix: trusted_prefix.to_string(),
        })
}
