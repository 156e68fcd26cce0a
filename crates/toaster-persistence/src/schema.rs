// Diesel schema shared by the SQLite and MySQL migrations.
use diesel::allow_tables_to_appear_in_same_query;

diesel::table! {
    pulsars (id) {
        id -> BigInt,
        pulsar_name -> Text,
    }
}

diesel::table! {
    pulsar_aliases (id) {
        id -> BigInt,
        pulsar_id -> BigInt,
        pulsar_alias -> Text,
    }
}

diesel::table! {
    telescopes (id) {
        id -> BigInt,
        telescope_name -> Text,
        telescope_abbrev -> Text,
        telescope_code -> Text,
        itrf_x -> Double,
        itrf_y -> Double,
        itrf_z -> Double,
        latitude -> Nullable<Double>,
        longitude -> Nullable<Double>,
        datum -> Nullable<Text>,
    }
}

diesel::table! {
    obssystems (id) {
        id -> BigInt,
        name -> Text,
        telescope_id -> BigInt,
        frontend -> Text,
        backend -> Text,
        band_descriptor -> Nullable<Text>,
        clock -> Nullable<Text>,
    }
}

diesel::table! {
    parfiles (id) {
        id -> BigInt,
        filepath -> Text,
        filename -> Text,
        md5 -> Text,
        pulsar_id -> BigInt,
        add_time -> Timestamp,
        comments -> Nullable<Text>,
        extra_params -> Text,
        psrj -> Nullable<Text>,
        raj -> Nullable<Text>,
        decj -> Nullable<Text>,
        pmra -> Nullable<Text>,
        pmdec -> Nullable<Text>,
        px -> Nullable<Text>,
        f0 -> Nullable<Text>,
        f1 -> Nullable<Text>,
        pepoch -> Nullable<Text>,
        posepoch -> Nullable<Text>,
        dm -> Nullable<Text>,
        dmepoch -> Nullable<Text>,
        binary_model -> Nullable<Text>,
        pb -> Nullable<Text>,
        a1 -> Nullable<Text>,
        ecc -> Nullable<Text>,
        t0 -> Nullable<Text>,
        om -> Nullable<Text>,
        tasc -> Nullable<Text>,
        eps1 -> Nullable<Text>,
        eps2 -> Nullable<Text>,
        ephem -> Nullable<Text>,
    }
}

diesel::table! {
    master_parfiles (id) {
        id -> BigInt,
        pulsar_id -> BigInt,
        parfile_id -> BigInt,
    }
}

diesel::table! {
    templates (id) {
        id -> BigInt,
        filepath -> Text,
        filename -> Text,
        md5 -> Text,
        pulsar_id -> BigInt,
        obssystem_id -> BigInt,
        add_time -> Timestamp,
        comments -> Nullable<Text>,
    }
}

diesel::table! {
    master_templates (id) {
        id -> BigInt,
        pulsar_id -> BigInt,
        obssystem_id -> BigInt,
        template_id -> BigInt,
    }
}

diesel::table! {
    rawfiles (id) {
        id -> BigInt,
        filepath -> Text,
        filename -> Text,
        md5 -> Text,
        pulsar_id -> BigInt,
        obssystem_id -> BigInt,
        add_time -> Timestamp,
        filesize -> BigInt,
        source_name -> Text,
        telescop -> Text,
        frontend -> Text,
        backend -> Text,
        nbin -> Integer,
        nchan -> Integer,
        npol -> Integer,
        nsub -> Integer,
        bw -> Double,
        freq -> Double,
        length -> Double,
        mjd -> Double,
    }
}

diesel::table! {
    versions (id) {
        id -> BigInt,
        pipeline_hash -> Text,
        library_hash -> Text,
        tempo2_revision -> Text,
    }
}

diesel::table! {
    processes (id) {
        id -> BigInt,
        rawfile_id -> BigInt,
        parfile_id -> BigInt,
        template_id -> BigInt,
        version_id -> BigInt,
        user_name -> Text,
        manipulator -> Text,
        manipulator_args -> Text,
        start_time -> Timestamp,
        end_time -> Timestamp,
        status -> Text,
    }
}

diesel::table! {
    toas (id) {
        id -> BigInt,
        process_id -> BigInt,
        rawfile_id -> BigInt,
        parfile_id -> BigInt,
        template_id -> BigInt,
        pulsar_id -> BigInt,
        obssystem_id -> BigInt,
        freq -> Double,
        imjd -> Integer,
        fmjd -> Double,
        toa_unc_us -> Double,
        goodness_of_fit -> Nullable<Double>,
        bw -> Nullable<Double>,
        length -> Nullable<Double>,
        nbin -> Nullable<Integer>,
        flags -> Text,
    }
}

diesel::table! {
    diagnostics (id) {
        id -> BigInt,
        rawfile_id -> BigInt,
        plugin -> Text,
        kind -> Text,
        float_value -> Nullable<Double>,
        filepath -> Nullable<Text>,
        array_value -> Nullable<Text>,
        add_time -> Timestamp,
    }
}

diesel::table! {
    users (id) {
        id -> BigInt,
        user_name -> Text,
        real_name -> Text,
        email -> Text,
    }
}

diesel::table! {
    curators (id) {
        id -> BigInt,
        pulsar_id -> BigInt,
        user_id -> BigInt,
    }
}

diesel::table! {
    opinions (id) {
        id -> BigInt,
        user_id -> BigInt,
        toa_id -> BigInt,
        is_bad -> Nullable<Bool>,
        comments -> Nullable<Text>,
    }
}

diesel::table! {
    timfiles (id) {
        id -> BigInt,
        pulsar_id -> BigInt,
        user_id -> Nullable<BigInt>,
        version_id -> BigInt,
        comments -> Nullable<Text>,
        add_time -> Timestamp,
    }
}

diesel::table! {
    toa_tim (id) {
        id -> BigInt,
        timfile_id -> BigInt,
        toa_id -> BigInt,
    }
}

allow_tables_to_appear_in_same_query!(pulsars,
                                      pulsar_aliases,
                                      telescopes,
                                      obssystems,
                                      parfiles,
                                      master_parfiles,
                                      templates,
                                      master_templates,
                                      rawfiles,
                                      versions,
                                      processes,
                                      toas,
                                      diagnostics,
                                      users,
                                      curators,
                                      opinions,
                                      timfiles,
                                      toa_tim);
