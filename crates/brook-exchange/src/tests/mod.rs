//! Scenario tests for the exchange engine, driven through mock providers.

mod cancel;
mod fetch;
mod helpers;
