use std::time::Duration;

use courier::{ConstantTable, Multipart, RequestSpec, ReceiverView, Sender, SendError};

fn main() -> Result<(), SendError> {
    env_logger::init();

    // Placeholders in URLs and header values are resolved from the global table.
    ConstantTable::global()
        .set("host", "httpbin.org")
        .set("token", "demo-token");

    // Blocking form post
    let receiver = Sender::post("https://{{host}}/post")
        .header("Authorization", "Bearer {{token}}")
        .body_form([("name", "courier"), ("greeting", "hello world")])
        .read_timeout(Duration::from_secs(10))
        .debug_label("form")
        .add_post_processor(|req: &RequestSpec, rcv: &dyn ReceiverView| -> anyhow::Result<()> {
            println!("{} {} -> {} in {:?}", req.method(), req.url(), rcv.outcome(), rcv.cost_time());
            Ok(())
        })
        .send()?;

    match receiver.status() {
        Some(status) => println!("status {status}, {} bytes", receiver.body().map_or(0, String::len)),
        None => println!("no response: {}", receiver.outcome()),
    }

    // Multipart upload, resolved from a plain thread
    let form = Multipart::new()
        .text("description", "generated report")
        .bytes("report", "report.csv", Some("text/csv"), "id,value\n1,42\n");

    let handle = Sender::post("https://{{host}}/post")
        .body_multipart(form)
        .log_failures_only(true)
        .send_async()?;

    match handle.wait() {
        Ok(receiver) if receiver.is_success() => println!("upload done in {} ms", receiver.cost_time_ms()),
        Ok(receiver) => println!("upload failed: {}", receiver.outcome()),
        Err(e) => println!("upload did not complete: {e}"),
    }

    Ok(())
}
