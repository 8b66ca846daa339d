//! # Synchronization primitives
//!
//! A single test-and-test-and-set spin lock that serializes short critical
//! sections, such as updates to the scatter-gather table registry. Page
//! acquisition and table walks happen outside the lock.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod backoff;
mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
