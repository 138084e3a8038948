/// Semantic fields looked up in free-form line-item metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaField {
    Material,
    Dimensions,
    Width,
    Height,
    Unit,
    Area,
    Sku,
    Url,
    ProductNote,
    Sample,
}

const MATERIAL: &[&str] = &[
    "pa_doku",
    "Nitelik",
    "Malzeme",
    "Kagit Turu",
    "Kagit Cinsi",
    "Material",
    "Paper Type",
    "Doku",
    "Kagit",
];
const DIMENSIONS: &[&str] = &[
    "Boyut",
    "Olculer",
    "Dimensions",
    "Ebat",
    "Size",
    "Olculeriniz",
    "Siparis Olcusu",
];
const WIDTH: &[&str] = &["Genislik", "Width"];
const HEIGHT: &[&str] = &["Yukseklik", "Height"];
const UNIT: &[&str] = &["Birim", "Unit"];
const AREA: &[&str] = &[
    "Toplam Alan",
    "Toplam Olcu",
    "Area",
    "Metrekare",
    "m2",
    "Total Size",
    "M2",
];
const SKU: &[&str] = &[
    "Stok Kodu",
    "SKU",
    "_stok_kodu",
    "Urun Kodu",
    "Kod",
    "Product Code",
    "_sku",
];
const URL: &[&str] = &[
    "_ozel_url",
    "ozel_url",
    "Özel Url",
    "Ozel Url",
    "Dosya Linki",
    "File Link",
    "Drive Link",
    "Link",
    "Url",
    "Siparis Dosyasi",
];
const PRODUCT_NOTE: &[&str] = &["Ürün Notu", "Urun Notu", "Not", "Note", "_urun_notu"];
const SAMPLE: &[&str] = &[
    "Numune İsteği",
    "Numune Istegi",
    "Numune",
    "Sample",
    "_numune",
];

/// Substrings of a normalized key that mark an uploaded-image entry.
pub const IMAGE_KEY_TERMS: &[&str] = &[
    "urun gorselleri",
    "gorsel",
    "resim",
    "image",
    "picture",
    "foto",
    "dosya",
    "upload",
    "img",
];

impl MetaField {
    pub const ALL: [MetaField; 10] = [
        MetaField::Material,
        MetaField::Dimensions,
        MetaField::Width,
        MetaField::Height,
        MetaField::Unit,
        MetaField::Area,
        MetaField::Sku,
        MetaField::Url,
        MetaField::ProductNote,
        MetaField::Sample,
    ];

    /// Accepted key spellings, highest priority first.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            MetaField::Material => MATERIAL,
            MetaField::Dimensions => DIMENSIONS,
            MetaField::Width => WIDTH,
            MetaField::Height => HEIGHT,
            MetaField::Unit => UNIT,
            MetaField::Area => AREA,
            MetaField::Sku => SKU,
            MetaField::Url => URL,
            MetaField::ProductNote => PRODUCT_NOTE,
            MetaField::Sample => SAMPLE,
        }
    }
}
