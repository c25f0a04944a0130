pub mod batcher;
pub mod config;
pub mod ffi;
pub mod html;
pub mod ir;
pub mod page;
pub mod pipeline;
pub mod progress;
pub mod providers;
pub mod retry;
pub mod sentinels;
pub mod textutil;
pub mod transport;
