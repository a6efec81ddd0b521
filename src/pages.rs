//! Resumable, page-at-a-time enumeration of a subnet's clients.
//!
//! A [`Cursor`] is a plain value: [`enumerate_page`] takes one in and hands
//! the advanced one back inside the [`Page`]. One call fetches exactly one
//! page, so callers can stop, retry or interleave other work between pages.
//!
//! ```text
//! INITIAL --page--> IN_PROGRESS --page--> IN_PROGRESS --no more items--> EXHAUSTED
//!                                                                          |
//!                                                     empty page, no call <+
//! ```
//!
//! A failed fetch returns an error and leaves the caller's cursor as it
//! was, so the same cursor can simply be tried again.

use std::iter::FusedIterator;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::api::{DhcpApi, LayoutCalls, Operation};
use crate::buffer::{Outcome, with_remote_buffer};
use crate::error::{Error, Result};
use crate::record::{ApiVersion, Client};
use crate::text::ip_to_uint32;
use crate::wire::{DhcpClientInfoPb, DhcpClientInfoV4};

/// Page size used when none is configured.
pub const DEFAULT_PAGE_SIZE: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Initial,
    InProgress,
    Exhausted,
}

/// Where an enumeration stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    resume_token: u32,
    preferred_page_size: u32,
    state: CursorState,
}

impl Cursor {
    pub fn new(preferred_page_size: u32) -> Self {
        Self {
            resume_token: 0,
            preferred_page_size,
            state: CursorState::Initial,
        }
    }

    /// The opaque value the server handed back with the last page.
    pub fn resume_token(&self) -> u32 {
        self.resume_token
    }

    pub fn preferred_page_size(&self) -> u32 {
        self.preferred_page_size
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted
    }

    fn advanced(self, resume_token: u32) -> Self {
        Self {
            resume_token,
            state: CursorState::InProgress,
            ..self
        }
    }

    fn exhausted(self) -> Self {
        Self {
            state: CursorState::Exhausted,
            ..self
        }
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

/// One page of an enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub clients: Vec<Client>,
    /// The cursor to pass to the next call.
    pub cursor: Cursor,
    /// Records the server reports it returned in this page.
    pub read: u32,
    /// The server's count of records in the subnet at the time of the call.
    ///
    /// Only an estimate: the registry may change between pages.
    pub total: u32,
}

impl Page {
    fn empty(cursor: Cursor, total: u32) -> Self {
        Self {
            clients: Vec::new(),
            cursor,
            read: 0,
            total,
        }
    }
}

/// Fetches the page after `cursor` using record layout `L`.
///
/// # Errors
///
/// Any status other than success, "more data" or "no more items" is
/// returned as an error; the remote buffer has been released by then.
pub fn enumerate_page<A, L>(api: &A, subnet: Ipv4Addr, cursor: Cursor) -> Result<Page>
where
    A: DhcpApi + ?Sized,
    L: LayoutCalls,
{
    if cursor.is_exhausted() {
        return Ok(Page::empty(cursor, 0));
    }

    let mut resume_handle = cursor.resume_token;
    let mut read = 0;
    let mut total = 0;

    // SAFETY: the out-pointer is only ever written by the call.
    let fetched = unsafe {
        with_remote_buffer(api, |clients| {
            L::enumerate(
                api,
                ip_to_uint32(subnet),
                &mut resume_handle,
                cursor.preferred_page_size,
                clients,
                &mut read,
                &mut total,
            )
        })
    };
    let (outcome, buffer) = fetched.into_outcome(Operation::EnumerateClients, &subnet)?;

    if outcome == Outcome::Exhausted {
        debug!(
            "Enumeration of {} exhausted at resume token {} ({} total)",
            subnet, cursor.resume_token, total
        );
        return Ok(Page::empty(cursor.exhausted(), total));
    }

    let clients = match &buffer {
        // SAFETY: the server filled the array before reporting success.
        Some(array) => unsafe { L::decode_array(array) }?,
        None => Vec::new(),
    };
    drop(buffer);

    if clients.len() != read as usize {
        debug!(
            "Server reported {} records read but returned {}",
            read,
            clients.len()
        );
    }

    debug!(
        "Fetched {} {} clients of {} in {} (resume token {} -> {})",
        clients.len(),
        L::VERSION,
        total,
        subnet,
        cursor.resume_token,
        resume_handle
    );

    Ok(Page {
        clients,
        cursor: cursor.advanced(resume_handle),
        read,
        total,
    })
}

/// [`enumerate_page`] with the layout picked at runtime.
pub fn enumerate_page_as<A>(
    api: &A,
    version: ApiVersion,
    subnet: Ipv4Addr,
    cursor: Cursor,
) -> Result<Page>
where
    A: DhcpApi + ?Sized,
{
    match version {
        ApiVersion::Legacy => enumerate_page::<A, DhcpClientInfoV4>(api, subnet, cursor),
        ApiVersion::Current => enumerate_page::<A, DhcpClientInfoPb>(api, subnet, cursor),
    }
}

/// A lazy walk over every client in a subnet, one page per server call.
///
/// Each walk starts from a fresh cursor. After an error the walk yields
/// that error once and then ends.
#[derive(Debug)]
pub struct SubnetWalk<'a, A: DhcpApi + ?Sized> {
    api: &'a A,
    version: ApiVersion,
    subnet: Ipv4Addr,
    cursor: Cursor,
    buffered: std::vec::IntoIter<Client>,
    cancel: Option<Arc<AtomicBool>>,
    done: bool,
}

impl<'a, A: DhcpApi + ?Sized> SubnetWalk<'a, A> {
    pub fn new(api: &'a A, version: ApiVersion, subnet: Ipv4Addr, page_size: u32) -> Self {
        Self {
            api,
            version,
            subnet,
            cursor: Cursor::new(page_size),
            buffered: Vec::new().into_iter(),
            cancel: None,
            done: false,
        }
    }

    /// Stops the walk before the next page once `flag` is set.
    ///
    /// A page already being fetched is allowed to finish.
    pub fn cancel_on(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn subnet(&self) -> Ipv4Addr {
        self.subnet
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

impl<A: DhcpApi + ?Sized> Iterator for SubnetWalk<'_, A> {
    type Item = Result<Client>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(client) = self.buffered.next() {
                return Some(Ok(client));
            }
            if self.done || self.cursor.is_exhausted() {
                return None;
            }
            if self.cancelled() {
                self.done = true;
                return Some(Err(Error::Cancelled));
            }

            let page = match enumerate_page_as(self.api, self.version, self.subnet, self.cursor) {
                Ok(page) => page,
                Err(error) => {
                    self.done = true;
                    return Some(Err(error));
                }
            };

            let stalled = page.clients.is_empty()
                && !page.cursor.is_exhausted()
                && page.cursor.resume_token() == self.cursor.resume_token()
                && self.cursor.state() != CursorState::Initial;
            if stalled {
                self.done = true;
                return Some(Err(Error::InvalidResponse(format!(
                    "Enumeration of {} returned an empty page without advancing",
                    self.subnet
                ))));
            }

            self.cursor = page.cursor;
            self.buffered = page.clients.into_iter();
        }
    }
}

impl<A: DhcpApi + ?Sized> FusedIterator for SubnetWalk<'_, A> {}
