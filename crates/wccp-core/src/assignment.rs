//! Traffic assignment engine.
//!
//! The designated cache of a group builds the assignment from the caches
//! every router currently agrees on and sends it in REDIRECT_ASSIGN. Routers
//! store what they receive and echo it back in I_SEE_YOU. The encoded
//! component is cached and rebuilt only after the assignment changes.

use std::net::Ipv4Addr;

use crate::component::{AltAssignBody, AltAssignComp, AssignInfoComp, AssignMapComp, Component};
use crate::element::{AssignmentKeyElt, HashAssignElt, MaskAssignElt, RouterAssignElt};
use crate::message::RedirectAssignment;
use crate::wire::{MsgBuffer, WireError, BUFFER_SIZE};

/// Which partition scheme the assignment carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssignmentForm {
    #[default]
    Hash,
    Mask,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Serialized {
    Dirty,
    Clean(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Assignment {
    key: AssignmentKeyElt,
    routers: Vec<RouterAssignElt>,
    hash: HashAssignElt,
    mask: MaskAssignElt,
    form: AssignmentForm,
    active: bool,
    serialized: Serialized,
}

impl Default for Assignment {
    fn default() -> Self {
        Self {
            key: AssignmentKeyElt::default(),
            routers: Vec::new(),
            hash: HashAssignElt::default(),
            mask: MaskAssignElt::default(),
            form: AssignmentForm::Hash,
            active: false,
            serialized: Serialized::Dirty,
        }
    }
}

impl Assignment {
    pub fn key(&self) -> AssignmentKeyElt {
        self.key
    }

    pub fn routers(&self) -> &[RouterAssignElt] {
        &self.routers
    }

    pub fn hash(&self) -> &HashAssignElt {
        &self.hash
    }

    pub fn mask(&self) -> &MaskAssignElt {
        &self.mask
    }

    pub fn form(&self) -> AssignmentForm {
        self.form
    }

    pub fn set_form(&mut self, form: AssignmentForm) -> &mut Self {
        if self.form != form {
            self.form = form;
            self.serialized = Serialized::Dirty;
        }
        self
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) -> &mut Self {
        self.active = active;
        self
    }

    /// Rebuild from the current view.
    ///
    /// `candidates` are the caches every router agrees on, in group order.
    /// Returns false and changes nothing when there are no routers or no
    /// candidates.
    pub fn fill(&mut self, key: AssignmentKeyElt, routers: Vec<RouterAssignElt>, candidates: &[Ipv4Addr]) -> bool {
        if routers.is_empty() || candidates.is_empty() {
            return false;
        }
        self.key = key;
        self.routers = routers;
        self.hash = HashAssignElt::new(candidates.to_vec());
        self.hash.round_robin_assign();
        self.mask = MaskAssignElt::single(candidates[0]);
        self.serialized = Serialized::Dirty;
        true
    }

    /// Refresh one router's receive id and change number.
    pub fn update_router_id(&mut self, addr: Ipv4Addr, recv_id: u32, change_number: u32) -> &mut Self {
        if let Some(r) = self.routers.iter_mut().find(|r| r.addr() == addr) {
            r.set_recv_id(recv_id).set_change_number(change_number);
            self.serialized = Serialized::Dirty;
        }
        self
    }

    /// Store an assignment received from the designated cache and mark it
    /// active.
    pub fn install(&mut self, received: RedirectAssignment) -> &mut Self {
        let (key, routers, body) = match received {
            RedirectAssignment::Hash(a) => (a.key, a.routers, AltAssignBody::Hash(a.hash)),
            RedirectAssignment::Alt(a) => (a.key, a.routers, a.body),
        };
        self.key = key;
        self.routers = routers;
        match body {
            AltAssignBody::Hash(h) => {
                self.hash = h;
                self.form = AssignmentForm::Hash;
            }
            AltAssignBody::Mask(m) => {
                self.mask = m;
                self.form = AssignmentForm::Mask;
            }
        }
        self.active = true;
        self.serialized = Serialized::Dirty;
        self
    }

    /// Components a router echoes in I_SEE_YOU: a hash assignment or a mask
    /// map, matching what it received. Nothing when inactive.
    pub fn echo(&self) -> (Option<AssignInfoComp>, Option<AssignMapComp>) {
        if !self.active {
            return (None, None);
        }
        match self.form {
            AssignmentForm::Hash => (
                Some(AssignInfoComp {
                    key: self.key,
                    routers: self.routers.clone(),
                    hash: self.hash.clone(),
                }),
                None,
            ),
            AssignmentForm::Mask => (
                None,
                Some(AssignMapComp {
                    mask: self.mask.clone(),
                }),
            ),
        }
    }

    /// Encoded assignment component for REDIRECT_ASSIGN, rebuilt on first
    /// use after a change.
    pub fn serialized(&mut self) -> Result<&[u8], WireError> {
        if self.serialized == Serialized::Dirty {
            let bytes = self.encode_component()?;
            self.serialized = Serialized::Clean(bytes);
        }
        match &self.serialized {
            Serialized::Clean(bytes) => Ok(bytes),
            Serialized::Dirty => Ok(&[]),
        }
    }

    fn encode_component(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = MsgBuffer::new(BUFFER_SIZE);
        match self.form {
            AssignmentForm::Hash => AssignInfoComp {
                key: self.key,
                routers: self.routers.clone(),
                hash: self.hash.clone(),
            }
            .fill(&mut buf)?,
            AssignmentForm::Mask => AltAssignComp {
                key: self.key,
                routers: self.routers.clone(),
                body: AltAssignBody::Mask(self.mask.clone()),
            }
            .fill(&mut buf)?,
        }
        Ok(buf.into_used())
    }

    #[cfg(test)]
    fn is_dirty(&self) -> bool {
        self.serialized == Serialized::Dirty
    }
}
