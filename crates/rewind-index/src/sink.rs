use rewind_packets::Packet;

/// Receives the packets a seek produces, in order.
pub trait PacketSink {
    fn accept(&mut self, packet: Packet);
}

impl PacketSink for Vec<Packet> {
    fn accept(&mut self, packet: Packet) {
        self.push(packet);
    }
}
