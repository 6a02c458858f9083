/*
 * The copyright in this software is being made available under the 2-clauses
 * BSD License, included below. This software may be subject to other third
 * party and contributor rights, including patent rights, and no such rights
 * are granted under this license.
 *
 * Copyright (c) 2005, Herve Drolon, FreeImage Team
 * All rights reserved.
 *
 * Redistribution and use in source and binary forms, with or without
 * modification, are permitted provided that the following conditions
 * are met:
 * 1. Redistributions of source code must retain the above copyright
 *    notice, this list of conditions and the following disclaimer.
 * 2. Redistributions in binary form must reproduce the above copyright
 *    notice, this list of conditions and the following disclaimer in the
 *    documentation and/or other materials provided with the distribution.
 *
 * THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS `AS IS'
 * AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
 * IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE
 * ARE DISCLAIMED.  IN NO EVENT SHALL THE COPYRIGHT OWNER OR CONTRIBUTORS BE
 * LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR
 * CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF
 * SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS
 * INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN
 * CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE)
 * ARISING IN ANY WAY OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE
 * POSSIBILITY OF SUCH DAMAGE.
 */

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
  Error,
  Warning,
  Info,
}

pub use EventType::Error as EVT_ERROR;
pub use EventType::Info as EVT_INFO;
pub use EventType::Warning as EVT_WARNING;

/// Sink for codec diagnostics.
///
/// Records are forwarded to the `log` facade; the manager additionally
/// keeps counters so a caller can see whether a "best effort" decode had
/// to paper over anything. Passed by reference through the whole codec,
/// never a global.
#[derive(Debug, Default, Clone)]
pub struct EventManager {
  errors: u32,
  warnings: u32,
}

impl EventManager {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn error_count(&self) -> u32 {
    self.errors
  }

  pub fn warning_count(&self) -> u32 {
    self.warnings
  }

  pub fn msg_write(&mut self, event_type: EventType, args: fmt::Arguments<'_>) {
    match event_type {
      EventType::Error => {
        self.errors += 1;
        log::error!("{}", args);
      }
      EventType::Warning => {
        self.warnings += 1;
        log::warn!("{}", args);
      }
      EventType::Info => log::info!("{}", args),
    }
  }
}

macro_rules! event_msg {
  ($event_mgr:expr, $event_type:expr, $($arg:tt)*) => {
    $event_mgr.msg_write($event_type, format_args!($($arg)*))
  };
}
