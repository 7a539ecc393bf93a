//! The controllable Modbus TCP server.
//!
//! This is the piece the HMI test suites talk to. It owns the register bank,
//! answers Modbus TCP requests against it, and runs a mirror task that stands
//! in for the PLC program while test mode is enabled: commanded outputs and
//! simulated inputs are copied into the status registers on every pass, and
//! every completed pass wakes `wait_for_update` callers.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, trace, warn};

use crate::bank::RegisterBank;
use crate::devices::{InputDevice, OutputDevice, TempSensor};
use crate::modbus::{
    self, ModbusTcpCodec, Operation, Request, Response, ResponseKind,
};
use crate::registers::{BitIndex, RegisterIndex};
use crate::temperature::Temp;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not bind a TCP listener on `{1}`")]
    Bind(#[source] std::io::Error, String),
    #[error("could not determine the listener address")]
    LocalAddr(#[source] std::io::Error),
    #[error("could not accept a client connection")]
    Accept(#[source] std::io::Error),
    #[error("could not read data from the client stream")]
    Receive(#[source] std::io::Error),
    #[error("could not send out the response")]
    Send(#[source] std::io::Error),
}

#[derive(clap::Parser, Clone)]
#[group(id = "server::Args")]
pub struct Args {
    /// The address to serve Modbus TCP on.
    #[arg(long, default_value = "127.0.0.1:1502")]
    pub listen: String,

    /// The modbus device ID this server answers as.
    ///
    /// Requests addressed to other device IDs are ignored.
    #[arg(long, short = 'i', default_value_t = 1)]
    pub device_id: u8,

    /// How often the simulated PLC program mirrors HMI writes into the status
    /// registers.
    #[arg(long, default_value = "50ms")]
    pub poll_interval: humantime::Duration,
}

/// Register cells the mirror pass operates on, resolved once at startup.
#[derive(Clone, Copy)]
struct MirrorCells {
    mode: RegisterIndex,
    cmd: RegisterIndex,
    sim_enable: RegisterIndex,
    sim_inputs: RegisterIndex,
    device_status: RegisterIndex,
    input_status: RegisterIndex,
}

impl MirrorCells {
    fn resolve() -> Self {
        let lookup = |name| {
            RegisterIndex::from_name(name).expect("mirror register missing from the map")
        };
        Self {
            mode: lookup("REG_MODE"),
            cmd: lookup("REG_CMD"),
            sim_enable: lookup("REG_SIM_ENABLE"),
            sim_inputs: lookup("REG_SIM_INPUTS"),
            device_status: lookup("REG_DEVICE_STATUS"),
            input_status: lookup("REG_INPUT_STATUS"),
        }
    }
}

pub struct ControllableServer {
    bank: Arc<RegisterBank>,
    cells: MirrorCells,
    local_addr: std::net::SocketAddr,
    shutdown: CancellationToken,
    listener_task: AbortOnDropHandle<Result<(), Error>>,
    mirror_task: AbortOnDropHandle<()>,
}

impl ControllableServer {
    pub async fn start(args: Args) -> Result<Self, Error> {
        let bank = Arc::new(RegisterBank::new());
        let cells = MirrorCells::resolve();
        let listener = TcpListener::bind(&args.listen)
            .await
            .map_err(|e| Error::Bind(e, args.listen.clone()))?;
        let local_addr = listener.local_addr().map_err(Error::LocalAddr)?;
        info!(message = "serving modbus tcp", %local_addr, device_id = args.device_id);
        let shutdown = CancellationToken::new();
        let listener_task = AbortOnDropHandle::new(tokio::spawn(accept_loop(
            listener,
            Arc::clone(&bank),
            args.device_id,
            shutdown.clone(),
        )));
        let mirror_task = AbortOnDropHandle::new(tokio::spawn(mirror_loop(
            Arc::clone(&bank),
            cells,
            *args.poll_interval,
            shutdown.clone(),
        )));
        Ok(Self {
            bank,
            cells,
            local_addr,
            shutdown,
            listener_task,
            mirror_task,
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    pub fn bank(&self) -> &Arc<RegisterBank> {
        &self.bank
    }

    /// Route field inputs and sensor values from the simulation registers
    /// instead of the (absent) field wiring.
    pub fn enable_test_mode(&self) {
        debug!("enabling test mode");
        self.bank.set(self.cells.sim_enable, 1);
    }

    pub fn disable_test_mode(&self) {
        debug!("disabling test mode");
        self.bank.set(self.cells.sim_enable, 0);
    }

    pub fn get_register(&self, register: RegisterIndex) -> u16 {
        self.bank.get(register)
    }

    pub fn set_register(&self, register: RegisterIndex, value: u16) {
        self.bank.set(register, value);
    }

    pub fn set_bit(&self, register: RegisterIndex, bit: impl Into<BitIndex>, value: bool) {
        self.bank.set_bit(register, bit.into(), value);
    }

    pub fn clear_bit(&self, register: RegisterIndex, bit: impl Into<BitIndex>) {
        self.bank.clear_bit(register, bit.into());
    }

    pub fn get_bit(&self, register: RegisterIndex, bit: impl Into<BitIndex>) -> bool {
        self.bank.get_bit(register, bit.into())
    }

    /// Override a sensor reading. Takes effect on the next mirror pass while
    /// test mode is on.
    pub fn set_temperature(&self, sensor: TempSensor, temp: Temp) {
        self.bank.set(sensor.sim_register(), temp.to_register_word());
    }

    /// The sensor value as the PLC program currently sees it.
    pub fn get_temperature(&self, sensor: TempSensor) -> Temp {
        Temp::from_register_word(self.bank.get(sensor.live_register()))
    }

    pub fn set_input(&self, device: InputDevice) {
        self.bank.set_bit(self.cells.sim_inputs, device.into(), true);
    }

    pub fn clr_input(&self, device: InputDevice) {
        self.bank.clear_bit(self.cells.sim_inputs, device.into());
    }

    /// The input state as seen by the PLC program after simulation muxing.
    pub fn get_input(&self, device: InputDevice) -> bool {
        self.bank.get_bit(self.cells.input_status, device.into())
    }

    pub fn output_active(&self, device: OutputDevice) -> bool {
        self.bank.get_bit(self.cells.device_status, device.into())
    }

    /// Resolves once a full mirror pass that began after this call completed.
    ///
    /// Waiting for two generation ticks rules out a pass that was already in
    /// flight when the caller's writes landed.
    pub async fn wait_for_update(&self) {
        let generation = self.bank.generation();
        self.bank.wait_past(generation + 1).await;
    }

    pub async fn stop(self) {
        info!("shutting down");
        self.shutdown.cancel();
        let _ = self.mirror_task.await;
        match self.listener_task.await {
            Ok(Ok(())) | Err(_) => {}
            Ok(Err(e)) => warn!(error = &e as &dyn std::error::Error, "listener failed"),
        }
    }
}

async fn mirror_loop(
    bank: Arc<RegisterBank>,
    cells: MirrorCells,
    poll_interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticks = tokio::time::interval(poll_interval);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticks.tick() => {}
        }
        mirror_pass(&bank, cells);
        bank.complete_pass();
    }
}

/// One scan of the simulated PLC program.
///
/// While test mode is on, outputs enabled in `REG_MODE` follow `REG_CMD`,
/// inputs follow `REG_SIM_INPUTS` and each live sensor cell takes its
/// simulated value. Outputs with a cleared `REG_MODE` bit have nothing driving
/// them on a bench rig and fall back to off.
fn mirror_pass(bank: &RegisterBank, cells: MirrorCells) {
    bank.with_cells(|values| {
        if values[cells.sim_enable.0] == 0 {
            return;
        }
        values[cells.device_status.0] = values[cells.cmd.0] & values[cells.mode.0];
        values[cells.input_status.0] = values[cells.sim_inputs.0];
        for sensor in [TempSensor::Ts1, TempSensor::Ts2, TempSensor::Ts3, TempSensor::Ts3d] {
            values[sensor.live_register().0] = values[sensor.sim_register().0];
        }
    });
}

async fn accept_loop(
    listener: TcpListener,
    bank: Arc<RegisterBank>,
    device_id: u8,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted.map_err(Error::Accept)?,
        };
        info!(message = "client connected", %peer);
        let nodelay_result = stream.set_nodelay(true);
        trace!(message = "setting nodelay", is_error = ?nodelay_result.err());
        tokio::spawn(serve_client(
            stream,
            Arc::clone(&bank),
            device_id,
            shutdown.clone(),
        ));
    }
}

async fn serve_client(
    stream: TcpStream,
    bank: Arc<RegisterBank>,
    device_id: u8,
    shutdown: CancellationToken,
) {
    let mut framed = Framed::new(stream, ModbusTcpCodec {});
    loop {
        let request = tokio::select! {
            _ = shutdown.cancelled() => return,
            request = framed.next() => request,
        };
        let request = match request {
            None => {
                debug!("client disconnected");
                return;
            }
            Some(Err(e)) => {
                warn!(error = &e as &dyn std::error::Error, "client stream failed");
                return;
            }
            Some(Ok(request)) => request,
        };
        if request.device_id != device_id {
            debug!(
                message = "ignoring request for another device",
                requested = request.device_id,
                serving = device_id,
            );
            continue;
        }
        let response = handle_request(&bank, &request);
        if let Err(e) = framed.send(&response).await {
            warn!(error = &e as &dyn std::error::Error, "sending response failed");
            return;
        }
    }
}

fn handle_request(bank: &RegisterBank, request: &Request) -> Response {
    let exception = |function, code| Response {
        device_id: request.device_id,
        transaction_id: request.transaction_id,
        kind: ResponseKind::Exception { function, code },
    };
    let kind = match request.operation {
        Operation::GetHoldings { address, count } => {
            if count == 0 {
                return exception(3, modbus::EXC_ILLEGAL_DATA_VALUE);
            }
            let mut values = Vec::with_capacity(usize::from(count));
            for offset in 0..count {
                let Some(target) = address
                    .checked_add(offset)
                    .and_then(RegisterIndex::from_address)
                else {
                    return exception(3, modbus::EXC_ILLEGAL_DATA_ADDRESS);
                };
                values.push(bank.get(target));
            }
            ResponseKind::Holdings { values }
        }
        Operation::SetHolding { address, value } => {
            let Some(target) = RegisterIndex::from_address(address) else {
                return exception(6, modbus::EXC_ILLEGAL_DATA_ADDRESS);
            };
            if !target.mode().is_writable() {
                return exception(6, modbus::EXC_ILLEGAL_DATA_ADDRESS);
            }
            if !target.accepts(value) {
                return exception(6, modbus::EXC_ILLEGAL_DATA_VALUE);
            }
            bank.set(target, value);
            ResponseKind::SetHolding { address, value }
        }
        Operation::Unsupported { function } => {
            return exception(function, modbus::EXC_ILLEGAL_FUNCTION);
        }
    };
    Response {
        device_id: request.device_id,
        transaction_id: request.transaction_id,
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(operation: Operation) -> Request {
        Request { device_id: 1, transaction_id: 9, operation }
    }

    #[test]
    fn reads_must_stay_within_the_map() {
        let bank = RegisterBank::new();
        let response = handle_request(
            &bank,
            &request(Operation::GetHoldings { address: 501, count: 4 }),
        );
        assert_eq!(response.kind, ResponseKind::Holdings { values: vec![0; 4] });

        let response = handle_request(
            &bank,
            &request(Operation::GetHoldings { address: 503, count: 4 }),
        );
        assert_eq!(
            response.kind,
            ResponseKind::Exception { function: 3, code: modbus::EXC_ILLEGAL_DATA_ADDRESS }
        );
    }

    #[test]
    fn writes_respect_mode_and_bounds() {
        let bank = RegisterBank::new();
        let response = handle_request(
            &bank,
            &request(Operation::SetHolding { address: 101, value: 0x1234 }),
        );
        assert_eq!(
            response.kind,
            ResponseKind::SetHolding { address: 101, value: 0x1234 }
        );
        assert_eq!(bank.get(RegisterIndex::from_address(101).unwrap()), 0x1234);

        // REG_TS_1 is read-only from the wire.
        let response = handle_request(
            &bank,
            &request(Operation::SetHolding { address: 501, value: 10 }),
        );
        assert_eq!(
            response.kind,
            ResponseKind::Exception { function: 6, code: modbus::EXC_ILLEGAL_DATA_ADDRESS }
        );

        // 801 is past the declared maximum of REG_SIM_TS_1.
        let response = handle_request(
            &bank,
            &request(Operation::SetHolding { address: 401, value: 801 }),
        );
        assert_eq!(
            response.kind,
            ResponseKind::Exception { function: 6, code: modbus::EXC_ILLEGAL_DATA_VALUE }
        );
    }

    #[test]
    fn mirror_pass_is_inert_without_test_mode() {
        let bank = RegisterBank::new();
        let cells = MirrorCells::resolve();
        bank.set(cells.cmd, 0xFFFF);
        bank.set(cells.mode, 0xFFFF);
        mirror_pass(&bank, cells);
        assert_eq!(bank.get(cells.device_status), 0);

        bank.set(cells.sim_enable, 1);
        mirror_pass(&bank, cells);
        assert_eq!(bank.get(cells.device_status), 0xFFFF);
    }

    #[test]
    fn mirror_pass_masks_commands_with_mode() {
        let bank = RegisterBank::new();
        let cells = MirrorCells::resolve();
        bank.set(cells.sim_enable, 1);
        bank.set(cells.mode, 0x0001);
        bank.set(cells.cmd, 0x0003);
        mirror_pass(&bank, cells);
        assert_eq!(bank.get(cells.device_status), 0x0001);
    }
}
