//! Python bindings.
//!
//! The poll loop runs on a Rust thread; Python code (typically a plotting
//! timer) calls `Poller.snapshot(n)` whenever it wants fresh data.

use std::thread::JoinHandle;
use std::time::Duration;

use log::LevelFilter;
use pyo3::exceptions::{PyConnectionError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::config::{PollerConfig, PortConfig, MAX_HISTORY, PID_MICROBIT, VID_MICROBIT};
use crate::errors::PortError;
use crate::exchange::Session;
use crate::logging;
use crate::poller::{PollLoop, PollStats};
use crate::port::PortHandle;

/// Polls micro:bit accelerometer nodes through a receiver on USB.
///
/// Example:
///     >>> poller = Poller(devices=3)
///     >>> poller.start()
///     >>> poller.snapshot(100)
///     {'mb_0': [477, 1486, None], 'mb_1': [...], 'mb_2': []}
///     >>> poller.stop()
#[pyclass(name = "Poller")]
struct PyPoller {
    poller: PollerConfig,
    port: PortConfig,
    session: Session,
    worker: Option<JoinHandle<PollStats>>,
}

#[pymethods]
impl PyPoller {
    #[new]
    #[pyo3(signature = (devices=3, vid=VID_MICROBIT, pid=PID_MICROBIT, port=None, history=MAX_HISTORY, scan_delay_ms=100))]
    fn new(
        devices: u8,
        vid: u16,
        pid: u16,
        port: Option<String>,
        history: usize,
        scan_delay_ms: u64,
    ) -> PyResult<Self> {
        if devices == 0 || history == 0 {
            return Err(PyValueError::new_err("devices and history must be positive"));
        }
        let poller = PollerConfig {
            max_history: history,
            scan_delay: Duration::from_millis(scan_delay_ms),
            ..PollerConfig::with_device_count(devices)
        };
        let port = PortConfig {
            vid,
            pid,
            path: port.map(Into::into),
            ..PortConfig::default()
        };
        Ok(PyPoller {
            session: Session::new(&poller),
            poller,
            port,
            worker: None,
        })
    }

    /// Open the receiver's port and start polling in the background.
    ///
    /// Raises:
    ///     ConnectionError: If no matching port is found or it cannot be opened.
    ///     RuntimeError: If the poller is already running.
    fn start(&mut self) -> PyResult<()> {
        if self.worker.is_some() {
            return Err(PyRuntimeError::new_err("poller already running"));
        }
        let handle = PortHandle::open(&self.port).map_err(port_error)?;
        // a fresh session per run so a stopped poller can be restarted
        self.session = Session::new(&self.poller);
        let worker = PollLoop::new(handle, self.session.clone(), &self.poller)
            .spawn()
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Last `n` magnitudes of every node, oldest first. Blank scans are None.
    #[pyo3(signature = (n=100))]
    fn snapshot<'py>(&self, py: Python<'py>, n: usize) -> PyResult<Bound<'py, PyDict>> {
        let snapshot = self.session.exchange().request(n);
        let dict = PyDict::new(py);
        for (device, values) in snapshot.iter() {
            dict.set_item(snapshot.label(device), values.to_vec())?;
        }
        Ok(dict)
    }

    /// Stop polling and return the loop's counters, or None if not running.
    fn stop<'py>(&mut self, py: Python<'py>) -> PyResult<Option<Bound<'py, PyDict>>> {
        let Some(worker) = self.worker.take() else {
            return Ok(None);
        };
        self.session.cancel_token().cancel();
        let stats = py
            .detach(|| worker.join())
            .map_err(|_| PyRuntimeError::new_err("poll loop panicked"))?;
        stats_dict(py, &stats).map(Some)
    }

    #[getter]
    fn running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    fn __repr__(&self) -> String {
        format!(
            "Poller(devices={}, history={}, running={})",
            self.poller.devices.len(),
            self.poller.max_history,
            self.running()
        )
    }
}

impl Drop for PyPoller {
    fn drop(&mut self) {
        self.session.cancel_token().cancel();
    }
}

fn port_error(e: PortError) -> PyErr {
    PyConnectionError::new_err(e.to_string())
}

fn stats_dict<'py>(py: Python<'py>, stats: &PollStats) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    dict.set_item("cycles", stats.cycles)?;
    dict.set_item("polls", stats.polls)?;
    dict.set_item("empty_reads", stats.empty_reads)?;
    dict.set_item("echoes", stats.echoes)?;
    dict.set_item("transport_errors", stats.transport_errors)?;
    dict.set_item("blank_scans", stats.blank_scans)?;
    dict.set_item("committed", stats.committed)?;
    dict.set_item("duplicates", stats.duplicates)?;
    dict.set_item("rejected", stats.rejected)?;
    Ok(dict)
}

/// Route Rust log records into Python's `logging` at `level` (default: env or "info").
#[pyfunction]
#[pyo3(signature = (level=None))]
fn init_logging(py: Python<'_>, level: Option<&str>) -> PyResult<()> {
    let level = match level {
        Some(s) => s
            .parse::<LevelFilter>()
            .map_err(|_| PyValueError::new_err(format!("invalid log level: {s}")))?,
        None => logging::env_level(),
    };
    logging::init_python_logging(py, level)
}

/// The Python module definition
#[pymodule]
fn microbit_poll(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyPoller>()?;
    m.add_function(wrap_pyfunction!(init_logging, m)?)?;

    m.add("VID_MICROBIT", VID_MICROBIT)?;
    m.add("PID_MICROBIT", PID_MICROBIT)?;
    m.add("MAX_HISTORY", MAX_HISTORY)?;

    Ok(())
}
