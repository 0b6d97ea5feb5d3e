//! # calltrace - JVM Method Entry Tracer
//!
//! calltrace is a native JVMTI agent that records every entry into the methods
//! of a configured set of Java packages. It rewrites class files as the JVM
//! loads them, inserting a short prelude at the start of each method body
//! that reports the call back to the agent, which writes one text line per
//! call to a file or standard output.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Java Application                           │
//! │            (classes in target packages, e.g. com/acme)          │
//! └───────────────┬───────────────────────────────▲─────────────────┘
//!                 │ ClassFileLoadHook              │ rewritten bytes
//!                 ▼                                │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Load Time (class loading threads)             │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐       │
//! │  │ LoadTimeHook │──▶│ TargetFilter │──▶│   Rewriter   │       │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘       │
//! │                                               │               │
//! │                                        ┌──────▼───────┐       │
//! │                                        │  classfile   │       │
//! │                                        │ (decode/enc) │       │
//! │                                        └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//!                 │ invokestatic calltrace/Tracer.logMethodCalled
//!                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Run Time (application threads)                 │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐       │
//! │  │   natives    │──▶│ TraceEmitter │──▶│  TraceSink   │       │
//! │  └──────────────┘   └──────┬───────┘   │ (file/stdout)│       │
//! │                            │           └──────────────┘       │
//! │                     ┌──────▼───────┐                          │
//! │                     │   Caller     │  JVMTI GetStackTrace     │
//! │                     │  Resolver    │                          │
//! │                     └──────────────┘                          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! ### Load Time
//!
//! - [`config`]: Layered configuration (properties file, then system properties)
//! - [`filter`]: Package prefix eligibility test
//! - [`classfile`]: Class file model, decoder and encoder
//!   - Constant pool, `Code` attribute, `StackMapTable`, modified UTF-8
//! - [`rewriter`]: Prelude injection and offset relocation, fail-open
//! - [`helper`]: Generated bytes of the `calltrace/Tracer` helper class
//! - [`hook`]: The `ClassFileLoadHook` contract: filter, rewrite, never fail
//!
//! ### Run Time
//!
//! - [`emitter`]: Trace line formatting and the shared output sink
//! - [`caller`]: Nearest target-package caller from the current stack
//!
//! ### Host Integration
//!
//! - [`agent`]: `Agent_OnLoad`/`Agent_OnUnload`, JVMTI bindings, lifecycle
//! - [`domain`]: Shared types and error enums
//!
//! ## Typical Usage
//!
//! ```bash
//! cargo run -p xtask -- build-agent --release
//! java -agentpath:target/release/libcalltrace.so \
//!      -Dtarget.packages=com.acme \
//!      -Doutput.file.path=/tmp/calls.log \
//!      -cp app.jar com.acme.Main
//! ```
//!
//! Agent diagnostics go to stderr through `env_logger`; set
//! `CALLTRACE_LOG=debug` to see which classes were instrumented.
//!
//! ## Key Concepts
//!
//! - **Prelude**: `ldc class; ldc method; invokestatic Tracer.logMethodCalled`,
//!   nop-padded to a multiple of 4 bytes
//! - **Fail-open**: a class that cannot be rewritten loads unchanged
//! - **Caller context**: the nearest enclosing frame in a target package

pub mod agent;
pub mod caller;
pub mod classfile;
pub mod config;
pub mod domain;
pub mod emitter;
pub mod filter;
pub mod helper;
pub mod hook;
pub mod rewriter;
