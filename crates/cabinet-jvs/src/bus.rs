use std::fmt;

use cabinet_frame::{HexBytes, IoBuf};

/// One device on a JVS daisy chain.
///
/// Nodes own their downstream neighbour, so a chain is built tail first and handed to
/// [`JvsBus::new`] by its head.
pub trait JvsNode: Send {
    /// True while the node still needs an address.
    fn sense(&self) -> bool;

    /// Observes one request frame and appends this node's response frame (if any) to `resp`.
    fn transact(&mut self, req: &[u8], resp: &mut IoBuf);

    fn next(&self) -> Option<&dyn JvsNode>;

    fn next_mut(&mut self) -> Option<&mut dyn JvsNode>;

    /// Current bus address, [`crate::UNASSIGNED`] if none.
    fn address(&self) -> u8;
}

/// Explicit bus context. Every frame is broadcast to every node; each decides by address
/// whether to answer.
#[derive(Default)]
pub struct JvsBus {
    head: Option<Box<dyn JvsNode>>,
}

impl JvsBus {
    pub fn new(head: Option<Box<dyn JvsNode>>) -> Self {
        Self { head }
    }

    /// Builds a chain from `items` in head-to-tail order. `make` receives each item together
    /// with the already-built remainder of the chain.
    pub fn build<I, F>(items: I, mut make: F) -> Self
    where
        I: IntoIterator,
        I::IntoIter: DoubleEndedIterator,
        F: FnMut(I::Item, Option<Box<dyn JvsNode>>) -> Box<dyn JvsNode>,
    {
        let head = items
            .into_iter()
            .rev()
            .fold(None, |next, item| Some(make(item, next)));
        Self { head }
    }

    /// The sense line as seen from upstream of `node`. An absent node senses false.
    pub fn sense(node: Option<&dyn JvsNode>) -> bool {
        node.is_some_and(|n| n.sense())
    }

    /// Broadcasts `req` to every node from the head, appending their responses to `resp`.
    /// Returns the number of response bytes appended.
    pub fn transact(&mut self, req: &[u8], resp: &mut IoBuf) -> usize {
        let start = resp.pos();
        tracing::trace!(req = %HexBytes(req), "JVS request");

        let mut node: Option<&mut dyn JvsNode> = match &mut self.head {
            Some(head) => Some(&mut **head),
            None => None,
        };
        while let Some(n) = node {
            n.transact(req, resp);
            node = n.next_mut();
        }

        let appended = &resp.filled()[start..];
        if !appended.is_empty() {
            tracing::trace!(resp = %HexBytes(appended), "JVS response");
        }
        appended.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &dyn JvsNode> + '_ {
        let head: Option<&dyn JvsNode> = self.head.as_deref();
        std::iter::successors(head, |n| n.next())
    }

    /// Addresses of every node, head first.
    pub fn addresses(&self) -> Vec<u8> {
        self.nodes().map(|n| n.address()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes().count()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

impl fmt::Debug for JvsBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JvsBus")
            .field("addresses", &self.addresses())
            .finish()
    }
}
