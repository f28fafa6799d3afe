pub mod socket;

pub use socket::{
    allocate_listening_socket, allocate_random_listening_socket, allocate_udp_client,
    ScopedSocket, MAX_PORT, MIN_UNPRIVILEGED_PORT,
};
