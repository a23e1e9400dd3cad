/*
    fdcdrv

    Copyright 2025 The fdcdrv Developers

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    lib.rs

    Root of the fdc_core crate.
*/

//! `fdc_core` contains the floppy disk controller transfer engine and the simulated
//! hardware used to exercise it.
//!
//! The [driver] module is the transfer engine proper: it pulls block requests from a
//! [request::RequestQueue], drives an NEC µPD765 compatible controller through a
//! [bus::FloppyBus], and completes each request exactly once.
//!
//! The [devices] module models the controller, the drives and the DMA channel behind
//! the same bus interface, and [machine::Machine] wires everything together with a
//! [timer::TickTimer] into a runnable event loop.

pub mod bus;
pub mod devices;
pub mod driver;
pub mod error;
pub mod machine;
pub mod request;
pub mod timer;

pub use driver::{config::DriverConfig, FloppyDriver};
pub use error::FloppyError;
