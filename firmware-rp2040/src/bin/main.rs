#![no_std]
#![no_main]

use core::cell::RefCell;
use cortex_m_rt::entry;
use defmt::{info, warn};
use defmt_rtt as _;
use embassy_executor::{Executor, InterruptExecutor, Spawner};
use embassy_futures::yield_now;
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::interrupt;
use embassy_rp::interrupt::{InterruptExt, Priority};
use embassy_rp::peripherals::USB;
use embassy_rp::usb::Driver;
use embassy_rp::{bind_interrupts, Peri};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Receiver;
use embassy_usb::class::cdc_acm::{Receiver as CdcReceiver, Sender as CdcSender, State};
use embassy_usb::{Builder, Config as UsbConfig, UsbDevice};
use portable_atomic::AtomicBool;
use static_cell::StaticCell;

use card_reader_bridge::board::{self, BoardStatus, DataBus, SharedBus};
use card_reader_bridge::config;
use card_reader_bridge::usb_serial::{self, Packet, PacketChannel, UsbDriver, UsbPacketWriter, UsbPump};
use card_reader_bridge::{
    configure_usb_serial, BulkInPump, BulkOutSink, Controller, FrameBuffer, FrameProducer,
    PickControl, RingBuffer, SerialTransport, DEFAULT_SLOTS, MAX_PACKET_SIZE, MAX_POSITIONS,
};

#[cfg(feature = "dev-panic")]
use panic_probe as _;
#[cfg(feature = "prod-panic")]
use panic_reset as _;

bind_interrupts!(struct Irqs {
    USBCTRL_IRQ => embassy_rp::usb::InterruptHandler<USB>;
});

type Frames = FrameBuffer<DEFAULT_SLOTS, MAX_POSITIONS>;
type FrameHandlers = FrameProducer<'static, DEFAULT_SLOTS, MAX_POSITIONS>;
type Pick = PickControl<Output<'static>>;
type Bus = SharedBus<Input<'static>>;
type ReaderController = Controller<'static, UsbPacketWriter, Output<'static>, Output<'static>>;
type PacketReceiver = Receiver<'static, CriticalSectionRawMutex, Packet, 1>;

/// Runs USB and the reader edge handlers, preempting the main loop.
static EXECUTOR_HIGH: InterruptExecutor = InterruptExecutor::new();
/// Runs the main loop in thread mode.
static EXECUTOR_LOW: StaticCell<Executor> = StaticCell::new();

static RX_RING: StaticCell<RingBuffer<u8, MAX_PACKET_SIZE>> = StaticCell::new();
static TX_RING: StaticCell<RingBuffer<u8, MAX_PACKET_SIZE>> = StaticCell::new();
static FRAMES: StaticCell<Frames> = StaticCell::new();
static IN_PACKETS: StaticCell<PacketChannel> = StaticCell::new();
static PUMP: StaticCell<UsbPump> = StaticCell::new();
static PICK: StaticCell<Pick> = StaticCell::new();
static DATA_BUS: StaticCell<Bus> = StaticCell::new();

/// Last level seen on the hopper-check line.
static HOPPER_LEVEL: AtomicBool = AtomicBool::new(true);

/// USB device configuration buffer.
static CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
static BOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
static MSOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
static CONTROL_BUF: StaticCell<[u8; 64]> = StaticCell::new();

/// CDC-ACM state.
static CDC_STATE: StaticCell<State> = StaticCell::new();

#[interrupt]
unsafe fn SWI_IRQ_1() {
    EXECUTOR_HIGH.on_interrupt()
}

#[entry]
fn main() -> ! {
    info!("Card reader bridge starting...");

    let p = embassy_rp::init(embassy_rp::config::Config::default());

    // --- Shared buffers ---
    let (rx_fill, rx) = RX_RING.init(RingBuffer::new()).split();
    let (tx, tx_drain) = TX_RING.init(RingBuffer::new()).split();
    let (handlers, frames) = FRAMES.init(FrameBuffer::new()).split();

    let packets = IN_PACKETS.init(PacketChannel::new());
    let pump: &'static UsbPump =
        PUMP.init(BulkInPump::new(tx_drain, UsbPacketWriter::new(packets.sender())));
    let serial = SerialTransport::new(rx, tx, pump);
    let sink = BulkOutSink::new(rx_fill);

    // --- Reader GPIO ---
    let pick: &'static Pick = PICK.init(PickControl::new(Output::new(p.PIN_18, Level::High)).unwrap());

    let bus: &'static Bus = DATA_BUS.init(Mutex::new(RefCell::new(DataBus::new([
        Input::new(p.PIN_0, Pull::Up),
        Input::new(p.PIN_1, Pull::Up),
        Input::new(p.PIN_2, Pull::Up),
        Input::new(p.PIN_3, Pull::Up),
        Input::new(p.PIN_4, Pull::Up),
        Input::new(p.PIN_5, Pull::Up),
        Input::new(p.PIN_6, Pull::Up),
        Input::new(p.PIN_7, Pull::Up),
        Input::new(p.PIN_8, Pull::Up),
        Input::new(p.PIN_9, Pull::Up),
        Input::new(p.PIN_10, Pull::Up),
        Input::new(p.PIN_11, Pull::Up),
    ]))));

    let strobe = Input::new(p.PIN_12, Pull::Up);
    let busy = Input::new(p.PIN_13, Pull::Up);
    let hopper = Input::new(p.PIN_14, Pull::Up);
    let status = BoardStatus::new(
        bus,
        &HOPPER_LEVEL,
        Input::new(p.PIN_15, Pull::Up), // MCK
        Input::new(p.PIN_16, Pull::Up), // ERR
        Input::new(p.PIN_17, Pull::Up), // RDY
    );

    // Activity LED (on-board LED on Pico)
    let led = Output::new(p.PIN_25, Level::Low);

    let controller = Controller::new(serial, frames, pick, led);

    // --- High priority: USB and edge handlers ---
    interrupt::SWI_IRQ_1.set_priority(Priority::P1);
    let spawner = EXECUTOR_HIGH.start(interrupt::SWI_IRQ_1);
    spawner.spawn(usb_setup_task(p.USB, sink, packets.receiver(), pump).unwrap());
    spawner.spawn(strobe_task(strobe, bus, handlers).unwrap());
    spawner.spawn(busy_task(busy, handlers, pick).unwrap());
    spawner.spawn(hopper_task(hopper, handlers, pick).unwrap());

    // --- Low priority: main loop ---
    let executor = EXECUTOR_LOW.init(Executor::new());
    executor.run(|spawner| {
        spawner.spawn(main_loop_task(controller, status).unwrap());
    })
}

/// Builds the USB device on the high-priority executor and spawns its tasks
/// there, so none of the USB types has to cross executors.
#[embassy_executor::task]
async fn usb_setup_task(
    usb: Peri<'static, USB>,
    sink: BulkOutSink<'static, MAX_PACKET_SIZE>,
    packets: PacketReceiver,
    pump: &'static UsbPump,
) {
    let usb_driver = Driver::new(usb, Irqs);

    let mut usb_config = UsbConfig::new(config::USB_VID, config::USB_PID);
    usb_config.manufacturer = Some(config::USB_MANUFACTURER);
    usb_config.product = Some(config::USB_PRODUCT);
    usb_config.serial_number = Some(config::USB_SERIAL_NUMBER);
    usb_config.max_power = config::USB_MAX_POWER_MA;
    usb_config.max_packet_size_0 = 64;

    let mut builder = Builder::new(
        usb_driver,
        usb_config,
        CONFIG_DESCRIPTOR.init([0; 256]),
        BOS_DESCRIPTOR.init([0; 256]),
        MSOS_DESCRIPTOR.init([0; 256]),
        CONTROL_BUF.init([0; 64]),
    );

    let class = configure_usb_serial(&mut builder, CDC_STATE.init(State::new()));
    let (sender, receiver) = class.split();
    let usb_device = builder.build();

    let spawner = Spawner::for_current_executor().await;
    spawner.spawn(usb_task(usb_device).unwrap());
    spawner.spawn(bulk_in_task(sender, packets, pump).unwrap());
    spawner.spawn(bulk_out_task(receiver, sink).unwrap());

    info!("USB serial configured");
}

/// USB device task - runs the USB stack.
#[embassy_executor::task]
async fn usb_task(mut device: UsbDevice<'static, UsbDriver>) {
    device.run().await;
}

#[embassy_executor::task]
async fn bulk_in_task(mut sender: CdcSender<'static, UsbDriver>, packets: PacketReceiver, pump: &'static UsbPump) {
    usb_serial::run_bulk_in(&mut sender, packets, pump).await
}

#[embassy_executor::task]
async fn bulk_out_task(mut receiver: CdcReceiver<'static, UsbDriver>, mut sink: BulkOutSink<'static, MAX_PACKET_SIZE>) {
    usb_serial::run_bulk_out(&mut receiver, &mut sink).await
}

/// IM- falling edge: latch one column.
#[embassy_executor::task]
async fn strobe_task(mut strobe: Input<'static>, bus: &'static Bus, frames: FrameHandlers) {
    board::watch_strobe(&mut strobe, bus, frames).await
}

/// BSY rising edge: card complete.
#[embassy_executor::task]
async fn busy_task(mut busy: Input<'static>, frames: FrameHandlers, pick: &'static Pick) {
    board::watch_busy(&mut busy, frames, pick).await
}

/// HCK falling edge: hopper empty.
#[embassy_executor::task]
async fn hopper_task(mut hopper: Input<'static>, frames: FrameHandlers, pick: &'static Pick) {
    board::watch_hopper(&mut hopper, &HOPPER_LEVEL, frames, pick).await
}

/// Main loop - commands in, frames and status out.
#[embassy_executor::task]
async fn main_loop_task(mut controller: ReaderController, mut status: BoardStatus<'static, Input<'static>>) {
    info!("Card reader bridge initialized, waiting for commands...");

    loop {
        if let Err(e) = controller.poll(&mut status) {
            warn!("Main loop error: {}", e);
        }
        yield_now().await;
    }
}
