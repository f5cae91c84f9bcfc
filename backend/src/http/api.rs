pub mod transfer_locks;

use actix_web::web;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(transfer_locks::acquire)
        .service(transfer_locks::heartbeat)
        .service(transfer_locks::release)
        .service(transfer_locks::lock_status)
        .service(transfer_locks::request_start)
        .service(transfer_locks::request_decide)
        .service(transfer_locks::request_state)
        .service(transfer_locks::pending_requests)
        .service(transfer_locks::audit);
}
