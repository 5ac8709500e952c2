// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Inter-core message bus
//!
//! Every core owns a bounded mailbox. Broadcasts fan out to every mailbox
//! and carry a [`WaitGroup`] token; the broadcaster blocks until every
//! recipient has dropped its token. A halted core's mailbox is closed, so a
//! token sent to it is dropped on the spot and never holds a broadcast up.

use crate::core::error::{EmulatorError, Result};
use crossbeam::channel::{bounded, Receiver, Sender};
use crossbeam::sync::WaitGroup;
use std::sync::{Mutex, PoisonError};

/// Messages delivered to a core's mailbox
#[derive(Debug)]
pub enum Message {
    /// Hardware interrupt request
    Irq(u8),
    Suspend(WaitGroup),
    WakeUp(WaitGroup),
    Halt(WaitGroup),
}

/// One sender per core
#[derive(Debug, Default)]
pub struct MessageBus {
    mailboxes: Vec<Mutex<Option<Sender<Message>>>>,
}

impl MessageBus {
    /// Create `cores` mailboxes of `capacity` messages each
    ///
    /// Returns the bus and the receiving end of every mailbox, by core id.
    pub fn new(cores: usize, capacity: usize) -> (Self, Vec<Receiver<Message>>) {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..cores).map(|_| bounded(capacity.max(1))).unzip();
        let bus = Self {
            mailboxes: senders.into_iter().map(|s| Mutex::new(Some(s))).collect(),
        };
        (bus, receivers)
    }

    pub fn len(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.is_empty()
    }

    fn sender(&self, core: usize) -> Result<Option<Sender<Message>>> {
        let mailbox = self
            .mailboxes
            .get(core)
            .ok_or_else(|| EmulatorError::ResourceNotFound(format!("core {}", core)))?;
        Ok(mailbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    /// Deliver `message` to one core
    ///
    /// Blocks while the mailbox is full. Returns `false` if the mailbox is
    /// closed; the message, and any token it carries, is dropped.
    pub fn send(&self, core: usize, message: Message) -> Result<bool> {
        let Some(sender) = self.sender(core)? else {
            return Ok(false);
        };
        match sender.send(message) {
            Ok(()) => Ok(true),
            Err(_) => {
                self.close(core);
                Ok(false)
            }
        }
    }

    /// Send a tokened message to every mailbox and wait for all tokens
    fn broadcast(&self, make: impl Fn(WaitGroup) -> Message) {
        let done = WaitGroup::new();
        for core in 0..self.mailboxes.len() {
            // Out-of-range is impossible here and a closed box releases the token
            let _ = self.send(core, make(done.clone()));
        }
        done.wait();
    }

    /// Suspend every living core and wait until all have
    pub fn suspend_all(&self) {
        log::debug!("Broadcasting suspend");
        self.broadcast(Message::Suspend);
    }

    /// Resume every suspended core and wait until all have
    pub fn wake_up_all(&self) {
        log::debug!("Broadcasting wake-up");
        self.broadcast(Message::WakeUp);
    }

    /// Halt every living core and wait until all have
    pub fn halt_all(&self) {
        log::debug!("Broadcasting halt");
        self.broadcast(Message::Halt);
    }

    /// Close a core's mailbox; later messages to it are dropped
    pub fn close(&self, core: usize) {
        if let Some(mailbox) = self.mailboxes.get(core) {
            mailbox.lock().unwrap_or_else(PoisonError::into_inner).take();
        }
    }

    pub fn is_open(&self, core: usize) -> bool {
        self.mailboxes.get(core).is_some_and(|mailbox| {
            mailbox
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
        })
    }
}
