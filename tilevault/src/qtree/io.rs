//! Quadtree blob codec.
//!
//! Pre-order depth-first walk; each node emits a single split bit, leaves
//! follow with their value as a byte-aligned varint.

use std::io;

use super::{Node, QTree};
use crate::binio::{bad, BitReader, BitWriter};

impl QTree {
    /// Serialize the node structure. The domain depth is not part of the
    /// blob; callers record it next to the blob (the tile index derives it
    /// from the LOD).
    pub fn serialize(&self) -> Vec<u8> {
        let mut bits = BitWriter::new();
        write_node(&self.root, &mut bits);
        bits.finish()
    }

    /// Rebuild a tree of the given depth from [`QTree::serialize`] output.
    pub fn deserialize(depth: u8, blob: &[u8]) -> io::Result<QTree> {
        let mut bits = BitReader::new(blob);
        let mut root = read_node(&mut bits, depth)?;
        root.collapse();
        Ok(QTree { depth, root })
    }
}

fn write_node(node: &Node, bits: &mut BitWriter) {
    match node {
        Node::Leaf(v) => {
            bits.push_bit(false);
            bits.push_varint(u64::from(*v));
        }
        Node::Branch(kids) => {
            bits.push_bit(true);
            for kid in kids.iter() {
                write_node(kid, bits);
            }
        }
    }
}

fn read_node(bits: &mut BitReader<'_>, depth: u8) -> io::Result<Node> {
    if bits.read_bit()? {
        if depth == 0 {
            return Err(bad("quadtree split below cell level"));
        }
        let mut kids = [Node::Leaf(0), Node::Leaf(0), Node::Leaf(0), Node::Leaf(0)];
        for kid in kids.iter_mut() {
            *kid = read_node(bits, depth - 1)?;
        }
        Ok(Node::Branch(Box::new(kids)))
    } else {
        let value = bits.read_varint()?;
        u32::try_from(value)
            .map(Node::Leaf)
            .map_err(|_| bad("quadtree value overflow"))
    }
}
