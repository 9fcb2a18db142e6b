#[macro_use]
extern crate rocket;

#[launch]
fn rocket() -> _ {
    threadline::init_logger();
    log::info!("Starting Threadline API Server");
    threadline::rocket()
}
