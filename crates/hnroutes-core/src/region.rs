//! City to province classification.
//!
//! Lookup is a first-match substring scan over an ordered table: the first key
//! contained in the city name decides the region. Order therefore matters when
//! one key is a substring of an unrelated city name; the default table keeps
//! the upstream ordering for that reason.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::OTHER_REGION;

/// Whole-name aliases applied before the substring scan.
const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("北京首都", "北京"),
    ("北京大兴", "北京"),
    ("上海浦东", "上海"),
    ("上海虹桥", "上海"),
    ("成都天府", "成都"),
];

#[rustfmt::skip]
const DEFAULT_CITIES: &[(&str, &str)] = &[
    ("北京", "北京"), ("上海", "上海"), ("天津", "天津"), ("重庆", "重庆"),
    // xinjiang
    ("阿克苏", "新疆"), ("乌鲁木齐", "新疆"), ("喀什", "新疆"), ("哈密", "新疆"),
    ("塔城", "新疆"), ("那拉提", "新疆"), ("图木舒克", "新疆"), ("博乐", "新疆"),
    ("库尔勒", "新疆"), ("库车", "新疆"), ("伊宁", "新疆"), ("于田", "新疆"),
    ("和田", "新疆"), ("石河子", "新疆"), ("阿勒泰", "新疆"), ("阿拉尔", "新疆"),
    // shaanxi
    ("西安", "陕西"), ("咸阳", "陕西"), ("延安", "陕西"), ("榆林", "陕西"),
    ("汉中", "陕西"), ("安康", "陕西"),
    // henan
    ("郑州", "河南"), ("洛阳", "河南"), ("安阳", "河南"), ("南阳", "河南"), ("信阳", "河南"),
    // anhui
    ("安庆", "安徽"), ("合肥", "安徽"), ("黄山", "安徽"), ("池州", "安徽"),
    ("亳州", "安徽"), ("阜阳", "安徽"),
    // hainan
    ("海口", "海南"), ("三亚", "海南"), ("琼海", "海南"),
    // zhejiang
    ("杭州", "浙江"), ("宁波", "浙江"), ("温州", "浙江"), ("台州", "浙江"),
    ("舟山", "浙江"), ("丽水", "浙江"),
    // sichuan
    ("成都", "四川"), ("天府", "四川"), ("绵阳", "四川"), ("泸州", "四川"),
    ("巴中", "四川"), ("南充", "四川"), ("达州", "四川"),
    // yunnan
    ("大理", "云南"), ("西双版纳", "云南"), ("昆明", "云南"), ("芒市", "云南"),
    ("丽江", "云南"), ("腾冲", "云南"), ("香格里拉", "云南"), ("沧源", "云南"),
    ("澜沧", "云南"),
    // liaoning
    ("大连", "辽宁"), ("沈阳", "辽宁"),
    // shandong
    ("青岛", "山东"), ("济南", "山东"), ("临沂", "山东"), ("威海", "山东"),
    ("烟台", "山东"), ("潍坊", "山东"), ("日照", "山东"), ("东营", "山东"),
    ("济宁", "山东"),
    // guangdong
    ("广州", "广东"), ("深圳", "广东"), ("惠州", "广东"), ("珠海", "广东"),
    ("揭阳", "广东"), ("湛江", "广东"), ("韶关", "广东"),
    // jiangsu and hunan, interleaved as published
    ("南京", "江苏"), ("苏州", "江苏"), ("长沙", "湖南"), ("张家界", "湖南"),
    ("常州", "江苏"), ("无锡", "江苏"), ("南通", "江苏"), ("徐州", "江苏"),
    ("扬州", "江苏"), ("淮安", "江苏"), ("盐城", "江苏"), ("连云港", "江苏"),
    ("衡阳", "湖南"), ("湘西", "湖南"), ("郴州", "湖南"), ("邵阳", "湖南"),
    ("永州", "湖南"), ("岳阳", "湖南"),
    // north-east
    ("哈尔滨", "黑龙江"), ("鸡西", "黑龙江"), ("大庆", "黑龙江"), ("长春", "吉林"),
    ("吉林", "吉林"), ("沈阳", "辽宁"),
    // north
    ("石家庄", "河北"), ("秦皇岛", "河北"), ("太原", "山西"), ("大同", "山西"),
    ("唐山", "河北"), ("邯郸", "河北"), ("邢台", "河北"), ("张家口", "河北"),
    ("长治", "山西"), ("吕梁", "山西"),
    // north-west, tibet, guangxi
    ("呼和浩特", "内蒙古"), ("包头", "内蒙古"), ("兰州", "甘肃"), ("敦煌", "甘肃"),
    ("张掖", "甘肃"), ("金昌", "甘肃"), ("西宁", "青海"), ("银川", "宁夏"),
    ("中卫", "宁夏"), ("拉萨", "西藏"), ("昌都", "西藏"), ("林芝", "西藏"),
    ("南宁", "广西"), ("桂林", "广西"), ("北海", "广西"), ("柳州", "广西"),
    ("玉林", "广西"),
    // guizhou, fujian
    ("贵阳", "贵州"), ("茅台", "贵州"), ("遵义", "贵州"),
    ("福州", "福建"), ("厦门", "福建"), ("泉州", "福建"),
    // jiangxi
    ("南昌", "江西"), ("赣州", "江西"), ("九江", "江西"), ("宜春", "江西"),
    ("上饶", "江西"), ("井冈山", "江西"),
    // inner mongolia
    ("二连浩特", "内蒙古"), ("阿尔山", "内蒙古"), ("满洲里", "内蒙古"),
    ("呼伦贝尔", "内蒙古"), ("霍林郭勒", "内蒙古"), ("乌海", "内蒙古"),
    ("乌兰浩特", "内蒙古"), ("通辽", "内蒙古"), ("赤峰", "内蒙古"),
    ("鄂尔多斯", "内蒙古"), ("锡林浩特", "内蒙古"),
    ("玉树", "青海"),
    ("安阳", "河南"), ("洛阳", "河南"),
    ("恩施", "湖北"), ("十堰", "湖北"),
    ("庆阳", "甘肃"), ("陇南", "甘肃"),
    ("合肥", "安徽"),
    ("武汉", "湖北"), ("宜昌", "湖北"), ("荆州", "湖北"), ("襄阳", "湖北"),
    ("温州", "浙江"), ("宁波", "浙江"), ("台州", "浙江"), ("舟山", "浙江"),
    ("张家界", "湖南"), ("怀化", "湖南"),
    ("唐山", "河北"),
    ("威海", "山东"),
    ("通辽", "内蒙古"),
];

/// Immutable ordered city-substring table plus exact-name aliases.
#[derive(Debug, Clone, Default)]
pub struct RegionMap {
    entries: Vec<(String, String)>,
    aliases: HashMap<String, String>,
}

impl RegionMap {
    pub fn builder() -> RegionMapBuilder {
        RegionMapBuilder::default()
    }

    /// The table used for the published route listing.
    pub fn hainan() -> Self {
        let mut builder = Self::builder();
        for (from, to) in DEFAULT_ALIASES {
            builder = builder.alias(*from, *to);
        }
        for (city, region) in DEFAULT_CITIES {
            builder = builder.city(*city, *region);
        }
        builder.build()
    }

    /// Region for `city`, or [`OTHER_REGION`] when no key matches.
    pub fn classify(&self, city: &str) -> &str {
        let normalized = self.aliases.get(city).map(String::as_str).unwrap_or(city);
        if normalized.is_empty() {
            return OTHER_REGION;
        }
        self.entries
            .iter()
            .find(|(key, _)| normalized.contains(key.as_str()))
            .map(|(_, region)| region.as_str())
            .unwrap_or(OTHER_REGION)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Default)]
pub struct RegionMapBuilder {
    entries: Vec<(String, String)>,
    aliases: HashMap<String, String>,
}

impl RegionMapBuilder {
    /// Append `city -> region`. A repeated city keeps its first position and
    /// takes the latest region.
    pub fn city(mut self, city: impl Into<String>, region: impl Into<String>) -> Self {
        let city = city.into();
        let region = region.into();
        if city.is_empty() {
            return self;
        }
        match self.entries.iter_mut().find(|(key, _)| *key == city) {
            Some(entry) => entry.1 = region,
            None => self.entries.push((city, region)),
        }
        self
    }

    pub fn alias(mut self, name: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.aliases.insert(name.into(), canonical.into());
        self
    }

    pub fn build(self) -> RegionMap {
        RegionMap {
            entries: self.entries,
            aliases: self.aliases,
        }
    }
}

/// Process-wide default table, built on first use.
pub fn default_regions() -> &'static RegionMap {
    static REGIONS: OnceLock<RegionMap> = OnceLock::new();
    REGIONS.get_or_init(RegionMap::hainan)
}

/// Classify against [`default_regions`].
pub fn classify(city: &str) -> &'static str {
    default_regions().classify(city)
}
