use crate::models::parcel::{DeliveryMode, ParcelType};

const BASE_FEE: f64 = 200.0;
const WEIGHT_RATE: f64 = 20.0;
const DISTANCE_RATE: f64 = 10.0;
const EXPRESS_MULTIPLIER: f64 = 1.5;

pub fn type_surcharge(parcel_type: ParcelType) -> f64 {
    match parcel_type {
        ParcelType::Envelope => 50.0,
        ParcelType::Bag => 100.0,
        ParcelType::BoxedPackage => 150.0,
        ParcelType::Suitcase => 200.0,
    }
}

pub fn price(parcel_type: ParcelType, weight: f64, distance_km: f64, mode: DeliveryMode) -> u64 {
    let mut total = BASE_FEE
        + type_surcharge(parcel_type)
        + weight * WEIGHT_RATE
        + distance_km * DISTANCE_RATE;

    if mode == DeliveryMode::Express {
        total *= EXPRESS_MULTIPLIER;
    }

    total.round().max(0.0) as u64
}
