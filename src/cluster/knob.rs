//! Knobs: setup-time customization of a cluster.
//!
//! A knob runs `init` after the cluster is built and wired but before any
//! engine starts, and `cleanup` after every engine has shut down. Knobs are
//! applied in the order given, and cleaned up in that same order.

use super::Cluster;
use crate::consensus::Config;

/// A two-phase customization hook.
pub trait Knob {
    fn init(&mut self, cluster: &mut Cluster);

    fn cleanup(&mut self, _cluster: &mut Cluster) {}
}

/// Only start the nodes at `indexes`.
///
/// The other nodes are discarded and cut off from the fabric; the started
/// nodes' peer directories list only each other.
pub fn servers(indexes: impl IntoIterator<Item = usize>) -> Box<dyn Knob> {
    Box::new(Servers {
        indexes: indexes.into_iter().collect(),
    })
}

/// Mutate each node's engine configuration. `f` receives the node index.
pub fn config(f: impl FnMut(usize, &mut Config) + 'static) -> Box<dyn Knob> {
    Box::new(ConfigKnob { f: Box::new(f) })
}

/// Drop a fraction `rate` of messages for the lifetime of the cluster.
pub fn drop_rate(rate: f64) -> Box<dyn Knob> {
    Box::new(DropRate { rate })
}

struct Servers {
    indexes: Vec<usize>,
}

impl Knob for Servers {
    fn init(&mut self, cluster: &mut Cluster) {
        cluster.keep_only(&self.indexes);
    }
}

struct ConfigKnob {
    f: Box<dyn FnMut(usize, &mut Config)>,
}

impl Knob for ConfigKnob {
    fn init(&mut self, cluster: &mut Cluster) {
        for node in cluster.nodes_mut() {
            (self.f)(node.index, &mut node.config);
        }
    }
}

struct DropRate {
    rate: f64,
}

impl Knob for DropRate {
    fn init(&mut self, cluster: &mut Cluster) {
        cluster.network().set_drop_rate(self.rate);
    }

    fn cleanup(&mut self, cluster: &mut Cluster) {
        cluster.network().set_drop_rate(0.0);
    }
}
