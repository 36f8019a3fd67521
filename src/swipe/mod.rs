//! Swipe decisions
//!
//! `SwipeController` applies swipes optimistically to the feed state and
//! submits likes to a `SwipeService`. Failed submissions roll the swipe back
//! and are reported out-of-band with a token that re-applies it.

mod controller;
mod service;

pub use controller::{RollbackToken, SwipeConfig, SwipeController, SwipeFailure, SwipeTicket};
pub use service::{
    EventHandler, PushChannel, PushSwipeService, SWIPE_EVENT, SWIPE_RESULT_EVENT, SubmitError, SubscriptionId,
    SwipeService,
};
