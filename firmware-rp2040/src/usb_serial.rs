//! USB CDC-ACM endpoints feeding the serial transport.
//!
//! The transport core hands finished IN packets to [`UsbPacketWriter`], which
//! parks them in a one-slot channel. [`run_bulk_in`] sends each one and then
//! reports completion, which lets the pump drain the next packet.
//! [`run_bulk_out`] copies every OUT packet into the receive ring.

use defmt::{error, info, warn};
use embassy_rp::peripherals::USB;
use embassy_rp::usb::Driver;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_usb::class::cdc_acm::{CdcAcmClass, Receiver as CdcReceiver, Sender as CdcSender, State};
use embassy_usb::Builder;
use reader_core::{BulkInPump, BulkOutSink, PacketWriter, MAX_PACKET_SIZE};

/// One IN packet.
pub type Packet = heapless::Vec<u8, MAX_PACKET_SIZE>;

/// Hand-off slot between the pump and the bulk-IN task.
pub type PacketChannel = Channel<CriticalSectionRawMutex, Packet, 1>;

/// USB driver for the RP2040.
pub type UsbDriver = Driver<'static, USB>;

/// Pump type shared by the main loop and the bulk-IN task.
pub type UsbPump = BulkInPump<'static, UsbPacketWriter, MAX_PACKET_SIZE>;

/// [`PacketWriter`] that queues packets for [`run_bulk_in`].
pub struct UsbPacketWriter {
    packets: Sender<'static, CriticalSectionRawMutex, Packet, 1>,
}

impl UsbPacketWriter {
    pub fn new(packets: Sender<'static, CriticalSectionRawMutex, Packet, 1>) -> Self {
        Self { packets }
    }
}

impl PacketWriter for UsbPacketWriter {
    fn start_transmit(&mut self, packet: &[u8]) {
        let Ok(packet) = Packet::from_slice(packet) else {
            error!("IN packet of {} bytes exceeds endpoint size", packet.len());
            return;
        };
        if self.packets.try_send(packet).is_err() {
            // the pump only submits while idle, so the slot should be free
            error!("IN packet rejected, previous packet still pending");
        }
    }
}

/// Add the CDC-ACM interface to the USB builder.
pub fn configure_usb_serial<'d>(
    builder: &mut Builder<'d, Driver<'d, USB>>,
    state: &'d mut State<'d>,
) -> CdcAcmClass<'d, Driver<'d, USB>> {
    CdcAcmClass::new(builder, state, MAX_PACKET_SIZE as u16)
}

/// Send queued packets and report each completion to the pump.
///
/// A full-size packet that ends a burst is followed by a zero-length packet
/// so the host sees the end of the transfer. A failed write means the host
/// went away: the packet is discarded and the pump returns to idle.
pub async fn run_bulk_in(
    sender: &mut CdcSender<'static, UsbDriver>,
    packets: Receiver<'static, CriticalSectionRawMutex, Packet, 1>,
    pump: &UsbPump,
) -> ! {
    let mut connected = false;
    loop {
        let packet = packets.receive().await;

        if sender.write_packet(&packet).await.is_err() {
            if connected {
                warn!("USB host gone, discarding output");
                connected = false;
            }
            pump.on_link_reset();
            continue;
        }
        connected = true;

        let more = pump.on_transmit_complete();
        if !more && packet.len() == MAX_PACKET_SIZE && sender.write_packet(&[]).await.is_err() {
            pump.on_link_reset();
        }
    }
}

/// Copy every OUT packet into the receive ring.
pub async fn run_bulk_out(
    receiver: &mut CdcReceiver<'static, UsbDriver>,
    sink: &mut BulkOutSink<'static, MAX_PACKET_SIZE>,
) -> ! {
    let mut buf = [0u8; MAX_PACKET_SIZE];
    loop {
        receiver.wait_connection().await;
        info!("USB host connected");

        while let Ok(len) = receiver.read_packet(&mut buf).await {
            let lost = sink.on_packet_received(&buf[..len]);
            if lost > 0 {
                warn!("receive ring full, {} bytes dropped ({} total)", lost, sink.dropped());
            }
        }
        info!("USB host disconnected");
    }
}
