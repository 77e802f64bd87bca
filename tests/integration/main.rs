//! Integration tests: the whole pipeline with in-memory stand-ins for the
//! LLM, upstream providers and database.

mod api;
mod pipeline;
mod stubs;
