use std::collections::HashSet;

use scraper::{ElementRef, Selector};
use serde_json::json;

use crate::models::MediaFile;

/// Attribute probes tried in order when hunting for a media URL.
const URL_ATTRS: &[&str] = &["src", "data-src", "data-lazy-src", "data-webp"];

/// URL fragments that mark non-content images (profile art, emoji, icons).
const NON_CONTENT_MARKERS: &[&str] = &["emoji", "profile", "avatar", "userpic", "channel_photo", "favicon", "icon_"];

fn sel(s: &str) -> Selector {
    Selector::parse(s).expect("static selector")
}

/// Extract every media attachment from a message element, deduplicated
/// by URL. Channel/owner/profile photos are excluded up front.
pub fn extract_media_files(message: &ElementRef) -> Vec<MediaFile> {
    let excluded = excluded_urls(message);
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    let mut push = |mut media: MediaFile| {
        media.url = normalize_media_url(&media.url);
        if media.url.is_empty() || excluded.contains(&media.url) || !seen.insert(media.url.clone()) {
            return;
        }
        files.push(media);
    };

    // Photos: wrap elements carry the image as a background style
    for wrap in message.select(&sel(".tgme_widget_message_photo_wrap")) {
        if let Some(url) = background_image_url(&wrap) {
            if is_content_image(&url) {
                push(MediaFile::new("image", url));
            }
        }
    }
    for img in message.select(&sel(".tgme_widget_message_photo img, .tgme_widget_message_text img")) {
        if let Some(url) = attr_url(&img) {
            if is_content_image(&url) {
                push(MediaFile::new("image", url));
            }
        }
    }

    // GIFs render as looping videos with a dedicated class
    for gif in message.select(&sel(".tgme_widget_message_gif video, video.tgme_widget_message_gif")) {
        if let Some(url) = attr_url(&gif) {
            push(MediaFile::new("gif", url));
        }
    }

    // Videos, with the poster thumb from the wrap background
    for video in message.select(&sel(".tgme_widget_message_video_wrap video, video[src]")) {
        if let Some(url) = attr_url(&video) {
            let mut media = MediaFile::new("video", url);
            media.duration = message
                .select(&sel(".tgme_widget_message_video_duration"))
                .next()
                .map(element_text);
            media.thumbnail = message
                .select(&sel(".tgme_widget_message_video_thumb"))
                .next()
                .and_then(|thumb| background_image_url(&thumb))
                .map(|u| normalize_media_url(&u));
            push(media);
        }
    }

    // Voice messages and audio
    for audio in message.select(&sel(".tgme_widget_message_voice, audio[src]")) {
        if let Some(url) = attr_url(&audio) {
            let mut media = MediaFile::new("audio", url);
            media.duration = message
                .select(&sel(".tgme_widget_message_voice_duration"))
                .next()
                .map(element_text);
            push(media);
        }
    }

    // Stickers
    for sticker in message.select(&sel(".tgme_widget_message_sticker_wrap .tgme_widget_message_sticker")) {
        let url = background_image_url(&sticker).or_else(|| attr_url(&sticker));
        if let Some(url) = url {
            push(MediaFile::new("sticker", url));
        }
    }

    // Documents: link plus title/size metadata
    for doc in message.select(&sel(".tgme_widget_message_document_wrap, .tgme_widget_message_document")) {
        let href = doc
            .value()
            .attr("href")
            .map(|h| h.to_string())
            .or_else(|| {
                doc.select(&sel("a[href]"))
                    .next()
                    .and_then(|a| a.value().attr("href").map(|h| h.to_string()))
            });
        if let Some(url) = href {
            let mut media = MediaFile::new("document", url);
            media.file_name = doc
                .select(&sel(".tgme_widget_message_document_title"))
                .next()
                .map(element_text);
            media.file_size = doc
                .select(&sel(".tgme_widget_message_document_extra"))
                .next()
                .map(element_text);
            push(media);
        }
    }

    // Polls carry structured data instead of a URL
    if let Some(poll) = message.select(&sel(".tgme_widget_message_poll")).next() {
        let question = poll
            .select(&sel(".tgme_widget_message_poll_question"))
            .next()
            .map(element_text)
            .unwrap_or_default();
        let options: Vec<String> = poll
            .select(&sel(".tgme_widget_message_poll_option_text"))
            .map(|o| element_text(o))
            .collect();
        if !question.is_empty() {
            let mut media = MediaFile::new("poll", format!("poll:{question}"));
            media.poll_data = Some(json!({ "question": question, "options": options }));
            files.push(media);
        }
    }

    // Locations link out to a map
    if let Some(location) = message.select(&sel(".tgme_widget_message_location_wrap a[href]")).next() {
        if let Some(href) = location.value().attr("href") {
            let mut media = MediaFile::new("location", href.to_string());
            media.location_data = Some(json!({ "url": href }));
            files.push(media);
        }
    }

    // Shared contacts
    if let Some(contact) = message.select(&sel(".tgme_widget_message_contact_wrap, .tgme_widget_message_contact")).next()
    {
        let text = element_text(contact);
        if !text.is_empty() {
            files.push(MediaFile::new("contact", format!("contact:{text}")));
        }
    }

    files
}

/// The single representative image for the article record: first
/// content photo, else a video thumbnail.
pub fn extract_image_url(message: &ElementRef) -> Option<String> {
    let files = extract_media_files(message);
    files
        .iter()
        .find(|m| m.media_type == "image")
        .map(|m| m.url.clone())
        .or_else(|| files.iter().find_map(|m| m.thumbnail.clone()))
}

/// URLs of channel/owner/profile photos, excluded before extraction.
fn excluded_urls(message: &ElementRef) -> HashSet<String> {
    let mut excluded = HashSet::new();
    for selector in [
        ".tgme_widget_message_owner_photo img",
        ".tgme_widget_message_user_photo img",
        ".tgme_widget_message_author_photo img",
    ] {
        for img in message.select(&sel(selector)) {
            if let Some(url) = attr_url(&img) {
                excluded.insert(normalize_media_url(&url));
            }
        }
    }
    excluded
}

fn attr_url(element: &ElementRef) -> Option<String> {
    URL_ATTRS
        .iter()
        .find_map(|attr| element.value().attr(attr))
        .map(|u| u.to_string())
        .or_else(|| background_image_url(element))
}

/// Pull a URL out of an inline `background-image: url(...)` style.
pub fn background_image_url(element: &ElementRef) -> Option<String> {
    let style = element.value().attr("style")?;
    let re = regex::Regex::new(r#"background-image:\s*url\(['"]?([^'")]+)['"]?\)"#).expect("static regex");
    re.captures(style).map(|c| c[1].to_string())
}

/// Absolutise CDN and Telegram-relative URLs.
pub fn normalize_media_url(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else if let Some(rest) = url.strip_prefix("//") {
        format!("https://{rest}")
    } else if url.starts_with('/') {
        format!("https://t.me{url}")
    } else {
        url.to_string()
    }
}

/// Filter out emoji, profile art, and obvious icon sizes.
pub fn is_content_image(url: &str) -> bool {
    let lower = url.to_lowercase();
    if NON_CONTENT_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return false;
    }
    // Tiny square dimensions embedded in the path are icons
    let re = regex::Regex::new(r"[_/](\d{2,3})x(\d{2,3})[_./]").expect("static regex");
    if let Some(caps) = re.captures(&lower) {
        let w: u32 = caps[1].parse().unwrap_or(0);
        let h: u32 = caps[2].parse().unwrap_or(0);
        if w <= 160 && h <= 160 {
            return false;
        }
    }
    true
}

fn element_text(element: ElementRef) -> String {
    element.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn first_message(html: &str) -> (Html, Selector) {
        (Html::parse_document(html), sel(".tgme_widget_message"))
    }

    #[test]
    fn photo_background_extracted_and_owner_excluded() {
        let html = r#"<div class="tgme_widget_message">
            <div class="tgme_widget_message_owner_photo"><img src="https://cdn.t.me/profile/ch.jpg"></div>
            <a class="tgme_widget_message_photo_wrap" style="background-image:url('https://cdn.t.me/file/photo1.jpg')"></a>
        </div>"#;
        let (doc, message_sel) = first_message(html);
        let message = doc.select(&message_sel).next().unwrap();

        let files = extract_media_files(&message);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].media_type, "image");
        assert_eq!(files[0].url, "https://cdn.t.me/file/photo1.jpg");
    }

    #[test]
    fn video_with_thumbnail_and_duration() {
        let html = r#"<div class="tgme_widget_message">
            <div class="tgme_widget_message_video_wrap">
                <video src="//cdn.t.me/file/video1.mp4"></video>
            </div>
            <i class="tgme_widget_message_video_thumb" style="background-image:url('/file/thumb1.jpg')"></i>
            <time class="tgme_widget_message_video_duration">0:42</time>
        </div>"#;
        let (doc, message_sel) = first_message(html);
        let message = doc.select(&message_sel).next().unwrap();

        let files = extract_media_files(&message);
        let video = files.iter().find(|m| m.media_type == "video").unwrap();
        assert_eq!(video.url, "https://cdn.t.me/file/video1.mp4", "protocol-relative absolutised");
        assert_eq!(video.thumbnail.as_deref(), Some("https://t.me/file/thumb1.jpg"));
        assert_eq!(video.duration.as_deref(), Some("0:42"));
    }

    #[test]
    fn poll_structured_data() {
        let html = r#"<div class="tgme_widget_message">
            <div class="tgme_widget_message_poll">
                <div class="tgme_widget_message_poll_question">Best editor?</div>
                <div class="tgme_widget_message_poll_option_text">vim</div>
                <div class="tgme_widget_message_poll_option_text">emacs</div>
            </div>
        </div>"#;
        let (doc, message_sel) = first_message(html);
        let message = doc.select(&message_sel).next().unwrap();

        let files = extract_media_files(&message);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].media_type, "poll");
        let poll = files[0].poll_data.as_ref().unwrap();
        assert_eq!(poll["question"], "Best editor?");
        assert_eq!(poll["options"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn duplicate_urls_collapse() {
        let html = r#"<div class="tgme_widget_message">
            <a class="tgme_widget_message_photo_wrap" style="background-image:url('https://cdn.t.me/p.jpg')"></a>
            <a class="tgme_widget_message_photo_wrap" style="background-image:url('https://cdn.t.me/p.jpg')"></a>
        </div>"#;
        let (doc, message_sel) = first_message(html);
        let message = doc.select(&message_sel).next().unwrap();
        assert_eq!(extract_media_files(&message).len(), 1);
    }

    #[test]
    fn content_image_filtering() {
        assert!(is_content_image("https://cdn.t.me/file/photo_big.jpg"));
        assert!(!is_content_image("https://cdn.t.me/emoji/smile.png"));
        assert!(!is_content_image("https://cdn.t.me/profile/user.jpg"));
        assert!(!is_content_image("https://cdn.t.me/img_40x40.png"));
        assert!(is_content_image("https://cdn.t.me/img_800x600.png"));
    }

    #[test]
    fn url_normalization_variants() {
        assert_eq!(normalize_media_url("//cdn.t.me/a.jpg"), "https://cdn.t.me/a.jpg");
        assert_eq!(normalize_media_url("/file/a.jpg"), "https://t.me/file/a.jpg");
        assert_eq!(normalize_media_url("https://x.com/a.jpg"), "https://x.com/a.jpg");
    }
}
