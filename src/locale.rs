const PROVINCES: &[(&str, &str)] = &[
    ("TR01", "ADANA"),
    ("TR02", "ADIYAMAN"),
    ("TR03", "AFYONKARAHİSAR"),
    ("TR04", "AĞRI"),
    ("TR05", "AMASYA"),
    ("TR06", "ANKARA"),
    ("TR07", "ANTALYA"),
    ("TR08", "ARTVİN"),
    ("TR09", "AYDIN"),
    ("TR10", "BALIKESİR"),
    ("TR11", "BİLECİK"),
    ("TR12", "BİNGÖL"),
    ("TR13", "BİTLİS"),
    ("TR14", "BOLU"),
    ("TR15", "BURDUR"),
    ("TR16", "BURSA"),
    ("TR17", "ÇANAKKALE"),
    ("TR18", "ÇANKIRI"),
    ("TR19", "ÇORUM"),
    ("TR20", "DENİZLİ"),
    ("TR21", "DİYARBAKIR"),
    ("TR22", "EDİRNE"),
    ("TR23", "ELAZIĞ"),
    ("TR24", "ERZİNCAN"),
    ("TR25", "ERZURUM"),
    ("TR26", "ESKİŞEHİR"),
    ("TR27", "GAZİANTEP"),
    ("TR28", "GİRESUN"),
    ("TR29", "GÜMÜŞHANE"),
    ("TR30", "HAKKARİ"),
    ("TR31", "HATAY"),
    ("TR32", "ISPARTA"),
    ("TR33", "MERSİN"),
    ("TR34", "İSTANBUL"),
    ("TR35", "İZMİR"),
    ("TR36", "KARS"),
    ("TR37", "KASTAMONU"),
    ("TR38", "KAYSERİ"),
    ("TR39", "KIRKLARELİ"),
    ("TR40", "KIRŞEHİR"),
    ("TR41", "KOCAELİ"),
    ("TR42", "KONYA"),
    ("TR43", "KÜTAHYA"),
    ("TR44", "MALATYA"),
    ("TR45", "MANİSA"),
    ("TR46", "KAHRAMANMARAŞ"),
    ("TR47", "MARDİN"),
    ("TR48", "MUĞLA"),
    ("TR49", "MUŞ"),
    ("TR50", "NEVŞEHİR"),
    ("TR51", "NİĞDE"),
    ("TR52", "ORDU"),
    ("TR53", "RİZE"),
    ("TR54", "SAKARYA"),
    ("TR55", "SAMSUN"),
    ("TR56", "SİİRT"),
    ("TR57", "SİNOP"),
    ("TR58", "SİVAS"),
    ("TR59", "TEKİRDAĞ"),
    ("TR60", "TOKAT"),
    ("TR61", "TRABZON"),
    ("TR62", "TUNCELİ"),
    ("TR63", "ŞANLIURFA"),
    ("TR64", "UŞAK"),
    ("TR65", "VAN"),
    ("TR66", "YOZGAT"),
    ("TR67", "ZONGULDAK"),
    ("TR68", "AKSARAY"),
    ("TR69", "BAYBURT"),
    ("TR70", "KARAMAN"),
    ("TR71", "KIRIKKALE"),
    ("TR72", "BATMAN"),
    ("TR73", "ŞIRNAK"),
    ("TR74", "BARTIN"),
    ("TR75", "ARDAHAN"),
    ("TR76", "IĞDIR"),
    ("TR77", "YALOVA"),
    ("TR78", "KARABÜK"),
    ("TR79", "KİLİS"),
    ("TR80", "OSMANİYE"),
    ("TR81", "DÜZCE"),
];

/// Province display name for a region code; unknown codes are returned as-is.
pub fn region_name(code: &str) -> &str {
    let trimmed = code.trim();
    PROVINCES
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(trimmed))
        .map(|(_, name)| *name)
        .unwrap_or(trimmed)
}

/// Turkish-locale uppercasing: `i` → `İ`, `ı` → `I`.
pub fn tr_uppercase(value: &str) -> String {
    value
        .chars()
        .flat_map(|c| match c {
            'i' => vec!['İ'],
            'ı' => vec!['I'],
            other => other.to_uppercase().collect(),
        })
        .collect()
}

// Dotted and dotless capitals compare equal so "Istanbul" matches "İSTANBUL".
fn fold_for_match(value: &str) -> String {
    tr_uppercase(value).replace('İ', "I")
}

/// Builds the display city: `"{city} / {REGION}"` unless the city already names the region.
pub fn compose_city(city: Option<&str>, state: Option<&str>) -> Option<String> {
    let city = city.map(str::trim).filter(|value| !value.is_empty());
    let Some(state) = state.map(str::trim).filter(|value| !value.is_empty()) else {
        return city.map(str::to_string);
    };
    let region = tr_uppercase(region_name(state));
    match city {
        Some(city) if fold_for_match(city).contains(&fold_for_match(&region)) => {
            Some(city.to_string())
        }
        Some(city) => Some(format!("{city} / {region}")),
        None => Some(region),
    }
}
