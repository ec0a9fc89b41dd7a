//! Wire types shared by the anonbox server and its clients.
//!
//! Every JSON body uses camelCase field names. Message and user ids are
//! exposed as `_id` to keep the shape existing front ends already consume.

pub mod api;
