//! Random-rectangle painter demo.
//!
//! Starts an RFB server and keeps painting random coloured 20x20 rectangles
//! into the framebuffer from a dedicated thread, broadcasting an update
//! after each one. Client input is echoed to stdout.
//!
//! Usage:
//!   cargo run --example random_rects
//!
//! Then connect with a VNC viewer to localhost:1234

use rand::Rng;
use rfbserver::{Colour, PixelDepth, RfbServer};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

fn paint_rectangle(server: &RfbServer, x1: u16, y1: u16, x2: u16, y2: u16, colour: Colour) {
    let mut area = server.get_area(x1, y1, x2, y2);
    for row in area.rows_mut() {
        for pixel in row.chunks_exact_mut(4) {
            pixel.copy_from_slice(&colour.bytes());
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let server = Arc::new(RfbServer::new(640, 480, PixelDepth::ThirtyTwo));

    server.on_key_event(|down, key| {
        println!("key {key:#06x} {}", if down { "down" } else { "up" });
    });
    server.on_pointer_event(|buttons, x, y| {
        println!("pointer at ({x},{y}) mask {:#04x}", buttons.raw());
    });
    server.on_client_clipboard_text(|text| {
        println!("client clipboard: {text}");
    });

    let addr = server.listen(1234).await?;
    println!("RFB server listening on {addr}");
    println!("Connect with: vncviewer localhost:1234");

    // The painter runs on its own thread; the framebuffer lock keeps it
    // coherent with update encoding on the runtime.
    let painter = server.clone();
    std::thread::spawn(move || {
        let mut rng = rand::thread_rng();
        loop {
            let x = rng.gen_range(0..painter.width());
            let y = rng.gen_range(0..painter.height());
            let width = (painter.width() - x).min(20);
            let height = (painter.height() - y).min(20);
            let colour = Colour::rgb(rng.gen(), rng.gen(), rng.gen());
            paint_rectangle(&painter, x, y, x + width, y + height, colour);
            painter.update();
            std::thread::sleep(Duration::from_secs(2));
        }
    });

    // Serve until interrupted; the painter keeps dirtying the framebuffer.
    std::future::pending::<()>().await;
    Ok(())
}
