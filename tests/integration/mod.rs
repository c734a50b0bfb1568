//! Integration tests for the chat relay
//!
//! These tests drive the real upstream client over HTTP against a wiremock
//! server, covering admission, retry, re-chunking and the SSE surface.

mod relay;
