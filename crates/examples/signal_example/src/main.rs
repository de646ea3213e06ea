use relay::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// A document the editor works on; senders of the typed signals below
struct Document {
    title: String,
}

struct AutoSaver {
    every: u32,
}

fn maybe_save(saver: &AutoSaver, sender: &Sender, edits: &u32) -> ReceiverResult<bool> {
    let title = sender
        .downcast_ref::<Document>()
        .map_or("<unknown>", |document| document.title.as_str());
    let due = edits % saver.every == 0;
    if due {
        info!(%title, edits, "auto-saving");
    }
    Ok(due)
}

fn main() -> Result<(), SignalError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Named signal with keyword payload, shared through the default namespace
    let greeter = signal("session.started").connect(&Receiver::new(|sender, kwargs: &Kwargs| {
        let user = kwargs.get("user").and_then(Value::as_str).unwrap_or("guest");
        Ok(Value::from(format!("hello {user} (via {sender:?})")))
    }))?;

    for (receiver, greeting) in signal("session.started").send("cli", &kwargs! { "user" => "ada" })? {
        info!(receiver = %receiver.key(), %greeting, "greeted");
    }

    // Typed signal filtered by sender
    let edited: Signal<u32, bool> = SignalBuilder::new()
        .name("document.edited")
        .doc("Sent with the number of edits since the document was opened")
        .build();

    let hook = Receiver::new(|_sender, event: &HookEvent| {
        if event.is_connect() {
            info!(receiver = %event.receiver_key, sender = ?event.sender, "receiver connected");
        } else {
            info!(receiver = %event.receiver_key, sender = ?event.sender, "receiver disconnected");
        }
        Ok(())
    });
    edited.receiver_connected().connect(&hook)?;
    edited.receiver_disconnected().connect(&hook)?;

    let notes = Tracked::new(Document {
        title: "notes.md".into(),
    });
    let draft = Tracked::new(Document {
        title: "draft.md".into(),
    });

    let saver = Tracked::new(AutoSaver { every: 3 });
    let auto_save = edited.connect_via(&Receiver::method(&saver, maybe_save), &notes)?;

    for edits in 1..=3 {
        let saved = edited
            .send(&notes, &edits)?
            .into_iter()
            .any(|(_, saved)| saved);
        info!(edits, saved, "notes edited");
    }
    info!(
        reached = edited.send(&draft, &3)?.len(),
        "draft edits do not reach the notes auto-saver"
    );

    // Scoped connection and muting
    {
        let _audit = edited.connected_to(
            &Receiver::new(|_sender, edits: &u32| {
                info!(edits, "audit trail");
                Ok(false)
            }),
            ANY,
        )?;
        edited.send(&draft, &4)?;

        let _quiet = edited.muted();
        edited.send(&draft, &5)?;
    }

    // Dropping the object expires the weakly held method receiver
    drop(auto_save);
    drop(saver);
    info!(
        connections = edited.connection_count(),
        "auto-saver gone without disconnect"
    );

    // A failing receiver aborts the send
    let _strict = edited.connect(&Receiver::new(|_sender, edits: &u32| {
        if *edits > 100 {
            Err(format!("{edits} edits without saving").into())
        } else {
            Ok(false)
        }
    }))?;
    if let Err(err) = edited.send(&notes, &101) {
        warn!(error = %err, "send aborted");
    }

    signal("session.started").disconnect(&greeter)?;
    Ok(())
}
