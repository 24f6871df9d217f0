use base64::{Engine, engine::general_purpose::STANDARD};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Attachment, Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
};
use tracing::{debug, warn};

use crate::dispatch::{Mailer, OutgoingMessage, SendOutcome};
use crate::model::{AttachmentDescriptor, RelaySettings};

/// Port that speaks TLS from the first byte; every other port upgrades via STARTTLS when offered.
const IMPLICIT_TLS_PORT: u16 = 465;

fn build_mailer(
    relay: &RelaySettings,
    accept_invalid_certs: bool,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, String> {
    let tls_params = TlsParameters::builder(relay.host.clone())
        .dangerous_accept_invalid_certs(accept_invalid_certs)
        .build()
        .map_err(|e| format!("tls parameters: {e}"))?;

    let tls = if relay.port == IMPLICIT_TLS_PORT {
        Tls::Wrapper(tls_params)
    } else {
        Tls::Opportunistic(tls_params)
    };

    let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&relay.host)
        .port(relay.port)
        .tls(tls);

    if !relay.user.is_empty() {
        builder = builder.credentials(Credentials::new(relay.user.clone(), relay.pass.clone()));
    }

    Ok(builder.build())
}

/// Splits a comma separated address list, ignoring blanks.
fn parse_mailboxes(field: &str, list: &str) -> Result<Vec<Mailbox>, String> {
    list.split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(|a| a.parse().map_err(|e| format!("bad {field} addr '{a}': {e}")))
        .collect()
}

async fn attachment_bytes(attachment: &AttachmentDescriptor) -> Option<Vec<u8>> {
    if let Some(content) = &attachment.content {
        return match STANDARD.decode(content) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(filename = %attachment.filename, "invalid base64 content: {e}");
                None
            }
        };
    }
    let path = attachment.path.as_deref()?;
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(path, "failed to read attachment: {e}");
            None
        }
    }
}

fn domain_of(mailbox: &Mailbox) -> String {
    mailbox.email.domain().to_string()
}

pub async fn build_message(message: &OutgoingMessage) -> Result<Message, String> {
    let from: Mailbox = message
        .from
        .parse()
        .map_err(|e| format!("bad from: {e}"))?;
    let message_id = format!("<{}@{}>", uuid::Uuid::new_v4(), domain_of(&from));

    let mut builder = Message::builder()
        .from(from)
        .subject(message.subject.as_str())
        .message_id(Some(message_id));

    let to = parse_mailboxes("to", &message.to)?;
    if to.is_empty() {
        return Err("to list is empty".into());
    }
    for mbox in to {
        builder = builder.to(mbox);
    }
    for mbox in parse_mailboxes("cc", &message.cc)? {
        builder = builder.cc(mbox);
    }
    for mbox in parse_mailboxes("bcc", &message.bcc)? {
        builder = builder.bcc(mbox);
    }

    let html = SinglePart::builder()
        .header(ContentType::TEXT_HTML)
        .body(message.html.clone());

    if message.attachments.is_empty() {
        return builder
            .singlepart(html)
            .map_err(|e| format!("build email: {e}"));
    }

    let mut mixed = MultiPart::mixed().singlepart(html);
    for attachment in &message.attachments {
        let Some(bytes) = attachment_bytes(attachment).await else {
            continue;
        };
        let mime = mime_guess::from_path(&attachment.filename).first_or_octet_stream();
        let content_type = ContentType::parse(mime.as_ref())
            .map_err(|e| format!("content type for '{}': {e}", attachment.filename))?;
        mixed = mixed.singlepart(Attachment::new(attachment.filename.clone()).body(bytes, content_type));
    }

    builder
        .multipart(mixed)
        .map_err(|e| format!("build email: {e}"))
}

#[derive(Debug, Clone, Default)]
pub struct SmtpMailer {
    pub accept_invalid_certs: bool,
}

impl Mailer for SmtpMailer {
    async fn send(
        &self,
        message: OutgoingMessage,
        relay: &RelaySettings,
    ) -> Result<SendOutcome, String> {
        let email = build_message(&message).await?;
        let message_id = email
            .headers()
            .get_raw("Message-ID")
            .map(|v| v.to_string());
        let mailer = build_mailer(relay, self.accept_invalid_certs)?;

        debug!(host = %relay.host, port = relay.port, to = %message.to, "smtp send");
        let response = mailer
            .send(email)
            .await
            .map_err(|e| format!("smtp send: {e}"))?;

        let text = response.message().collect::<Vec<_>>().join(" ");
        let summary = format!("{} {}", response.code(), text);
        if response.is_positive() {
            Ok(SendOutcome {
                success: true,
                message_id,
                response_message: Some(summary),
                error: None,
            })
        } else {
            Ok(SendOutcome {
                success: false,
                message_id,
                response_message: None,
                error: Some(summary),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outgoing() -> OutgoingMessage {
        OutgoingMessage {
            from: "\"Support Desk\" <desk@example.com>".into(),
            to: "ann@example.com".into(),
            cc: "lead@example.com, ,boss@example.com".into(),
            bcc: "audit@example.com".into(),
            subject: "Hi Ann".into(),
            html: "<p>Hello</p>".into(),
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_parse_mailboxes() {
        let boxes = parse_mailboxes("cc", "a@x.com, b@y.org,,").unwrap();
        assert_eq!(boxes.len(), 2);
        assert!(parse_mailboxes("cc", "").unwrap().is_empty());
        assert!(parse_mailboxes("to", "not an address").is_err());
    }

    #[tokio::test]
    async fn test_build_message_headers_and_envelope() {
        let email = build_message(&outgoing()).await.unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("Subject: Hi Ann"));
        assert!(raw.contains("desk@example.com"));
        assert!(raw.contains("Message-ID: <"));
        assert!(raw.contains("text/html"));

        let recipients: Vec<String> = email
            .envelope()
            .to()
            .iter()
            .map(|a| a.to_string())
            .collect();
        assert_eq!(recipients.len(), 4);
        assert!(recipients.contains(&"audit@example.com".to_string()));
    }

    #[tokio::test]
    async fn test_build_message_with_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let on_disk = dir.path().join("terms.txt");
        std::fs::write(&on_disk, b"terms").unwrap();

        let mut msg = outgoing();
        msg.attachments = vec![
            AttachmentDescriptor {
                filename: "report.pdf".into(),
                content: Some(STANDARD.encode(b"%PDF-1.4")),
                path: None,
            },
            AttachmentDescriptor {
                filename: "terms.txt".into(),
                content: None,
                path: Some(on_disk.to_string_lossy().into_owned()),
            },
            AttachmentDescriptor {
                filename: "broken.bin".into(),
                content: Some("***".into()),
                path: None,
            },
        ];

        let raw = String::from_utf8(build_message(&msg).await.unwrap().formatted()).unwrap();
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("report.pdf"));
        assert!(raw.contains("application/pdf"));
        assert!(raw.contains("terms.txt"));
        assert!(!raw.contains("broken.bin"));
    }

    #[tokio::test]
    async fn test_build_message_rejects_bad_addresses() {
        let mut msg = outgoing();
        msg.to = " , ".into();
        assert_eq!(build_message(&msg).await.unwrap_err(), "to list is empty");

        let mut msg = outgoing();
        msg.from = "nobody".into();
        assert!(build_message(&msg).await.unwrap_err().starts_with("bad from"));
    }

    #[tokio::test]
    async fn test_build_mailer() {
        let relay = RelaySettings {
            host: "smtp.example.com".into(),
            port: 465,
            user: "u".into(),
            pass: "p".into(),
            ..Default::default()
        };
        assert!(build_mailer(&relay, false).is_ok());
    }
}
