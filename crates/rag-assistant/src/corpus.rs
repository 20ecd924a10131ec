use crate::index::NewDocument;

/// (id, title, tags, body)
const GUIDANCE: &[(&str, &str, &[&str], &str)] = &[
    (
        "emergency-numbers",
        "Emergency numbers",
        &["emergency", "police", "ambulance", "112"],
        "Dial 112 for any emergency; it reaches police, fire and ambulance services. \
         The in-app panic button also alerts the nearest police control room with your location.",
    ),
    (
        "panic-button",
        "Using the panic button",
        &["panic", "alert", "sos", "app"],
        "Press and hold the panic button to raise an alert. Your live location is shared with \
         responders until an officer acknowledges the alert, and your emergency contacts are notified.",
    ),
    (
        "lost-passport",
        "Lost or stolen passport",
        &["passport", "documents", "embassy", "theft"],
        "Report a lost or stolen passport at the nearest police station and get a copy of the report. \
         Then contact your embassy or consulate for an emergency travel document.",
    ),
    (
        "restricted-zones",
        "Restricted and danger zones",
        &["geofence", "restricted", "danger", "zone", "border"],
        "Restricted zones include border areas, protected forests and military sites that need a permit. \
         The app warns you when you enter one and notifies local police automatically.",
    ),
    (
        "night-travel",
        "Travelling at night",
        &["night", "late", "taxi", "transport"],
        "After dark, keep to well lit main roads, use prepaid or app-based taxis, and share your trip \
         with someone you trust. Avoid isolated beaches and ghats at night.",
    ),
    (
        "scams",
        "Common tourist scams",
        &["scam", "fraud", "money", "guide"],
        "Be wary of unofficial guides, gem resale offers and taxi drivers who claim your hotel is closed. \
         Use licensed guides and pay at official counters.",
    ),
    (
        "medical-help",
        "Medical help",
        &["medical", "hospital", "ambulance", "health", "injury"],
        "For medical emergencies dial 108 for an ambulance or use the medical alert in the app. \
         Keep a list of allergies and medication with your emergency contacts.",
    ),
    (
        "weather-trekking",
        "Weather and trekking",
        &["weather", "trek", "monsoon", "mountain", "landslide"],
        "During the monsoon check landslide warnings before trekking, register your route with the \
         local tourist office, and do not trek alone in remote areas.",
    ),
    (
        "women-safety",
        "Women travellers",
        &["women", "harassment", "helpline"],
        "The women's helpline 1091 is available around the clock. Report harassment to the tourist \
         police; many stations have dedicated women officers.",
    ),
    (
        "water-food",
        "Food and water",
        &["water", "food", "hygiene", "illness"],
        "Drink sealed bottled or filtered water and eat freshly cooked food. \
         Seek medical help if diarrhoea lasts more than two days.",
    ),
];

/// The built-in tourist safety guidance
pub(crate) fn safety_guidance() -> impl Iterator<Item = NewDocument> {
    GUIDANCE.iter().map(|(id, title, tags, body)| NewDocument {
        id: (*id).to_string(),
        title: (*title).to_string(),
        body: (*body).to_string(),
        tags: tags.iter().map(|t| (*t).to_string()).collect(),
    })
}
