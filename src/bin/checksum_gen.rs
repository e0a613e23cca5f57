//! Stand-in for the external checksum generator the simulator shells out to.

fn main() {
    println!("{}", fleetnexus::simulator::random_string(32));
}
