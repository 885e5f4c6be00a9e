//! Destination -> interface routing table, keyed by the address hash so a
//! lookup and the default-route fallback share one map.

use std::collections::HashMap;

use crate::addr::Address;
use crate::error::{Error, Result};
use crate::frame::Repeater;

/// Opaque handle to an [`crate::iface::Interface`] owned by the server's
/// interface arena. Routes borrow interfaces by key rather than owning them.
pub type IfaceId = usize;

#[derive(Debug, Clone)]
pub struct Route {
    pub iface: IfaceId,
    pub dest: Address,
    pub repeaters: Vec<Repeater>,
}

impl Route {
    pub fn new(iface: IfaceId, dest: Address, repeaters: Vec<Repeater>) -> Result<Route> {
        if repeaters.len() > crate::frame::MAX_HOPS {
            return Err(Error::Overflow);
        }
        Ok(Route { iface, dest, repeaters })
    }

    pub fn default_route(iface: IfaceId) -> Route {
        Route { iface, dest: Address::EMPTY, repeaters: Vec::new() }
    }
}

#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<u32, Route>,
}

impl RouteTable {
    pub fn new() -> RouteTable {
        RouteTable::default()
    }

    /// `find(dest)` returns the matching route, or the default route (the
    /// one stored under the empty address's hash) if none matches.
    pub fn find(&self, dest: &Address) -> Option<&Route> {
        self.routes.get(&dest.hash()).or_else(|| self.default_route())
    }

    pub fn default_route(&self) -> Option<&Route> {
        self.routes.get(&Address::EMPTY.hash())
    }

    pub fn add(&mut self, route: Route) -> Result<()> {
        let hash = route.dest.hash();
        if self.routes.contains_key(&hash) {
            return Err(Error::Protocol("route already exists"));
        }
        self.routes.insert(hash, route);
        Ok(())
    }

    pub fn delete(&mut self, dest: &Address) -> Option<Route> {
        self.routes.remove(&dest.hash())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    #[test]
    fn falls_back_to_default_route() {
        let mut table = RouteTable::new();
        table.add(Route::default_route(0)).unwrap();
        table.add(Route::new(1, addr("WIDE1-1"), vec![]).unwrap()).unwrap();

        assert_eq!(table.find(&addr("WIDE1-1")).unwrap().iface, 1);
        assert_eq!(table.find(&addr("N0CALL-5")).unwrap().iface, 0);
    }

    #[test]
    fn duplicate_route_rejected() {
        let mut table = RouteTable::new();
        table.add(Route::new(0, addr("N0CALL"), vec![]).unwrap()).unwrap();
        assert!(table.add(Route::new(1, addr("N0CALL"), vec![]).unwrap()).is_err());
    }

    #[test]
    fn no_default_route_is_none() {
        let table = RouteTable::new();
        assert!(table.find(&addr("N0CALL")).is_none());
    }
}
